use anyhow::{bail, Context};
use log::debug;
use ndarray::Array2;
use num_complex::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tscore::interface::PlatformGeoref;
use tscore::iwrf::{CodecContext, IqEncoding, Pulse, ScanMode, MAX_CHAN};
use tscore::prelude::{IwrfResult, PulseSource, SourceEvent};

/// Configuration for generating a synthetic pulse stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Stop after this many pulses; run forever when `None`.
    pub n_pulses: Option<u64>,
    pub n_gates: usize,
    pub n_channels: usize,
    pub prt: f32,
    pub start_range_m: f32,
    pub gate_spacing_m: f32,
    pub target_gate: usize,
    pub target_amplitude: f32,
    /// Phase advance of the target per pulse, radians.
    pub phase_step_rad: f32,
    pub noise: f32,
    pub encoding: IqEncoding,
    pub elevation_deg: f32,
    pub azimuth_rate_dps: f32,
    pub start_time_secs: i64,
    /// Skip a sequence number after every this many pulses.
    pub drop_every: Option<u64>,
    /// Send one platform georef packet with this vertical velocity first.
    pub vert_velocity_mps: Option<f32>,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            n_pulses: Some(4096),
            n_gates: 200,
            n_channels: 2,
            prt: 0.001,
            start_range_m: 150.0,
            gate_spacing_m: 150.0,
            target_gate: 40,
            target_amplitude: 0.5,
            phase_step_rad: 0.3,
            noise: 0.001,
            encoding: IqEncoding::Fl32,
            elevation_deg: 1.0,
            azimuth_rate_dps: 10.0,
            start_time_secs: 1_700_000_000,
            drop_every: None,
            vert_velocity_mps: None,
            seed: 0,
        }
    }
}

impl GeneratorConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.n_channels == 0 || self.n_channels > MAX_CHAN {
            bail!("generator n_channels {} outside 1..={}", self.n_channels, MAX_CHAN);
        }
        if self.target_gate >= self.n_gates {
            bail!(
                "generator target gate {} beyond {} gates",
                self.target_gate,
                self.n_gates
            );
        }
        if self.encoding == IqEncoding::ScaledSi32 {
            bail!("generator cannot write ScaledSi32 payloads");
        }
        if !(self.prt > 0.0) {
            bail!("generator prt must be positive");
        }
        Ok(())
    }
}

/// Pulse source producing an encoded packet stream with one moving target.
pub struct SyntheticSource {
    config: GeneratorConfig,
    codec: CodecContext,
    rng: StdRng,
    emitted: u64,
    seq_num: i64,
    georef_sent: bool,
}

impl SyntheticSource {
    pub fn new(config: GeneratorConfig, codec: CodecContext) -> anyhow::Result<Self> {
        config.validate().context("validating generator config")?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            codec,
            emitted: 0,
            seq_num: 0,
            georef_sent: false,
        })
    }

    fn build_pulse(&mut self) -> IwrfResult<Pulse> {
        let cfg = &self.config;
        let k = self.emitted;
        let noise = cfg.noise;
        let mut iq = Array2::from_elem((cfg.n_channels, cfg.n_gates), Complex32::new(0.0, 0.0));
        if noise > 0.0 {
            for value in iq.iter_mut() {
                *value = Complex32::new(
                    self.rng.gen_range(-noise..noise),
                    self.rng.gen_range(-noise..noise),
                );
            }
        }
        let target = Complex32::from_polar(cfg.target_amplitude, cfg.phase_step_rad * k as f32);
        for (ch, mut row) in iq.outer_iter_mut().enumerate() {
            row[cfg.target_gate] += target * 0.5f32.powi(ch as i32);
        }

        let elapsed = k as f64 * cfg.prt as f64;
        let secs = cfg.start_time_secs + elapsed.floor() as i64;
        let nanos = ((elapsed - elapsed.floor()) * 1.0e9) as i32;

        let mut pulse = Pulse::new(self.codec);
        pulse.set_iq_channels(iq)?;
        pulse.set_seq_num(self.seq_num);
        pulse.set_time(secs, nanos);
        {
            let header = pulse.header_mut();
            header.scan_mode = ScanMode::AzSur360;
            header.elevation_deg = cfg.elevation_deg;
            header.fixed_el_deg = cfg.elevation_deg;
            header.azimuth_deg = ((elapsed * cfg.azimuth_rate_dps as f64) % 360.0) as f32;
            header.prt = cfg.prt;
            header.prt_next = cfg.prt;
            header.start_range_m = cfg.start_range_m;
            header.gate_spacing_m = cfg.gate_spacing_m;
        }
        if cfg.encoding != IqEncoding::Fl32 {
            pulse.convert_to_packed(cfg.encoding)?;
        }
        Ok(pulse)
    }
}

impl PulseSource for SyntheticSource {
    fn next_event(&mut self) -> IwrfResult<SourceEvent> {
        if !self.georef_sent {
            self.georef_sent = true;
            if let Some(vert) = self.config.vert_velocity_mps {
                let georef = PlatformGeoref {
                    time_secs: self.config.start_time_secs,
                    vert_velocity_mps: vert,
                    ..Default::default()
                };
                return Ok(SourceEvent::Packet(georef.encode()?));
            }
        }
        if let Some(limit) = self.config.n_pulses {
            if self.emitted >= limit {
                return Ok(SourceEvent::EndOfStream);
            }
        }

        let pulse = self.build_pulse()?;
        self.emitted += 1;
        self.seq_num += 1;
        if let Some(every) = self.config.drop_every {
            if every > 0 && self.emitted % every == 0 {
                debug!("generator dropping pulse {}", self.seq_num);
                self.seq_num += 1;
            }
        }
        Ok(SourceEvent::Packet(pulse.assemble()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tscore::iwrf::PLATFORM_GEOREF_ID;

    fn collect(source: &mut SyntheticSource) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        while let SourceEvent::Packet(p) = source.next_event().unwrap() {
            packets.push(p);
        }
        packets
    }

    #[test]
    fn generator_emits_configured_pulse_count() {
        let config = GeneratorConfig {
            n_pulses: Some(10),
            n_gates: 32,
            target_gate: 5,
            ..Default::default()
        };
        let mut source = SyntheticSource::new(config, CodecContext::default()).unwrap();
        let packets = collect(&mut source);
        assert_eq!(packets.len(), 10);

        let pulse = Pulse::from_buffer(&packets[3], CodecContext::default(), true).unwrap();
        assert_eq!(pulse.n_gates(), 32);
        assert_eq!(pulse.n_channels(), 2);
        assert_eq!(pulse.seq_num(), 3);
        let target = pulse.get_iq(0, 5).unwrap();
        assert!((target.norm() - 0.5).abs() < 0.01);
    }

    #[test]
    fn packed_encodings_decode() {
        for encoding in [IqEncoding::ScaledSi16, IqEncoding::SigmetFl16, IqEncoding::DbmPhaseSi16] {
            let config = GeneratorConfig {
                n_pulses: Some(2),
                n_gates: 16,
                target_gate: 3,
                encoding,
                ..Default::default()
            };
            let mut source = SyntheticSource::new(config, CodecContext::default()).unwrap();
            let packets = collect(&mut source);
            let pulse = Pulse::from_buffer(&packets[1], CodecContext::default(), false).unwrap();
            assert_eq!(pulse.stored_encoding(), encoding);
            assert!((pulse.get_iq(0, 3).unwrap().norm() - 0.5).abs() < 0.01);
        }
    }

    #[test]
    fn dropped_pulses_leave_sequence_gaps() {
        let config = GeneratorConfig {
            n_pulses: Some(6),
            n_gates: 8,
            target_gate: 1,
            drop_every: Some(3),
            ..Default::default()
        };
        let mut source = SyntheticSource::new(config, CodecContext::default()).unwrap();
        let seqs: Vec<i64> = collect(&mut source)
            .iter()
            .map(|p| Pulse::from_buffer(p, CodecContext::default(), true).unwrap().seq_num())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 4, 5, 6]);
    }

    #[test]
    fn georef_packet_comes_first() {
        let config = GeneratorConfig {
            n_pulses: Some(1),
            n_gates: 8,
            target_gate: 1,
            vert_velocity_mps: Some(1.5),
            ..Default::default()
        };
        let mut source = SyntheticSource::new(config, CodecContext::default()).unwrap();
        let packets = collect(&mut source);
        assert_eq!(packets.len(), 2);
        let id = i32::from_le_bytes([packets[0][0], packets[0][1], packets[0][2], packets[0][3]]);
        assert_eq!(id, PLATFORM_GEOREF_ID);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = GeneratorConfig {
            n_gates: 10,
            target_gate: 10,
            ..Default::default()
        };
        assert!(SyntheticSource::new(config, CodecContext::default()).is_err());
    }
}
