use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tscore::interface::DistanceUnits;
use tscore::iwrf::{CodecContext, SigmetVariant};
use tscore::processing::{Calibration, DwellConfig};

use crate::generator::profile::GeneratorConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Xml,
    Text,
    Json,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub n_samples: usize,
    pub start_gate: usize,
    pub n_gates: Option<usize>,
    pub distance_units: DistanceUnits,
    pub wavelength_m: Option<f64>,
    pub sigmet_legacy_unpacking: bool,
    pub sigmet_saturation_mult: f32,
    pub invert_hv_flag: bool,
    pub cohere_to_burst: bool,
    pub max_trips: usize,
    /// Drop the partial dwell when the source times out instead of
    /// carrying on with it.
    pub discard_dwell_on_timeout: bool,
    pub read_timeout_secs: u64,
    pub output_format: OutputFormat,
    pub calibration_path: Option<PathBuf>,
    pub generator: GeneratorConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            n_samples: 64,
            start_gate: 0,
            n_gates: None,
            distance_units: DistanceUnits::Meters,
            wavelength_m: None,
            sigmet_legacy_unpacking: false,
            sigmet_saturation_mult: 1.0,
            invert_hv_flag: false,
            cohere_to_burst: false,
            max_trips: 1,
            discard_dwell_on_timeout: false,
            read_timeout_secs: 10,
            output_format: OutputFormat::Xml,
            calibration_path: None,
            generator: GeneratorConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading monitor config {}", path_ref.display()))?;
        let config: MonitorConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing monitor config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(n_samples: usize, start_gate: usize, n_gates: Option<usize>) -> Self {
        Self {
            n_samples,
            start_gate,
            n_gates,
            ..Default::default()
        }
    }

    /// Built once per run, before the first pulse is decoded.
    pub fn codec_context(&self) -> CodecContext {
        let variant = if self.sigmet_legacy_unpacking {
            SigmetVariant::Legacy
        } else {
            SigmetVariant::Standard
        };
        CodecContext::new(variant, self.sigmet_saturation_mult)
    }

    pub fn to_dwell_config(&self) -> DwellConfig {
        DwellConfig {
            n_samples: self.n_samples,
            start_gate: self.start_gate,
            n_gates: self.n_gates,
            units: self.distance_units,
            wavelength_m: self.wavelength_m,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }

    pub fn load_calibration(&self) -> anyhow::Result<Calibration> {
        match &self.calibration_path {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("reading calibration {}", path.display()))?;
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("parsing calibration {}", path.display()))
            }
            None => Ok(Calibration::default()),
        }
    }
}
