use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use generator::profile::SyntheticSource;
use log::{info, warn};
use status_bridge::bridge::{default_bind_address, StatusBridge};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use tscore::interface::DistanceUnits;
use tscore::prelude::PulseSource;
use tscore::source::{connect_tcp, FileListSource};
use tscore::telemetry::MetricsRecorder;
use workflow::config::{MonitorConfig, OutputFormat};
use workflow::runner::Runner;

mod generator;
mod status_bridge;
mod workflow;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Prints max power and its range for each dwell of an IWRF pulse stream"
)]
struct Args {
    /// Load monitor settings from YAML; command line flags override them
    #[arg(long)]
    params: Option<PathBuf>,
    /// Read pulses from these files in order
    #[arg(long = "file", num_args = 1..)]
    files: Vec<PathBuf>,
    /// Read pulses from a live server, host:port
    #[arg(long)]
    tcp: Option<String>,
    /// Generate a synthetic pulse stream instead of reading one
    #[arg(long, default_value_t = false)]
    simulate: bool,
    /// Pulses per dwell
    #[arg(long)]
    n_samples: Option<usize>,
    /// First gate of the max-power search
    #[arg(long)]
    start_gate: Option<usize>,
    /// Number of gates searched; defaults to the rest of the pulse
    #[arg(long)]
    n_gates: Option<usize>,
    /// Report range in feet
    #[arg(long, default_value_t = false)]
    feet: bool,
    /// Radar wavelength in meters, enables velocity output
    #[arg(long)]
    wavelength: Option<f64>,
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    /// Unpack SIGMET 16-bit floats with the legacy table
    #[arg(long, default_value_t = false)]
    legacy_unpacking: bool,
    /// Serve the latest status record over HTTP
    #[arg(long, default_value_t = false)]
    serve: bool,
    #[arg(long)]
    serve_addr: Option<SocketAddr>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn monitor_config(&self) -> anyhow::Result<MonitorConfig> {
        let mut config = match &self.params {
            Some(path) => MonitorConfig::load(path)?,
            None => MonitorConfig::default(),
        };
        if let Some(n) = self.n_samples {
            config.n_samples = n;
        }
        if let Some(gate) = self.start_gate {
            config.start_gate = gate;
        }
        if self.n_gates.is_some() {
            config.n_gates = self.n_gates;
        }
        if self.feet {
            config.distance_units = DistanceUnits::Feet;
        }
        if self.wavelength.is_some() {
            config.wavelength_m = self.wavelength;
        }
        if let Some(format) = self.format {
            config.output_format = format;
        }
        if self.legacy_unpacking {
            config.sigmet_legacy_unpacking = true;
        }
        Ok(config)
    }

    fn open_source(&self, config: &MonitorConfig) -> anyhow::Result<Box<dyn PulseSource>> {
        if self.simulate {
            let source = SyntheticSource::new(config.generator.clone(), config.codec_context())?;
            return Ok(Box::new(source));
        }
        if let Some(addr) = &self.tcp {
            let reader = connect_tcp(addr.as_str(), config.read_timeout())
                .with_context(|| format!("connecting to pulse server {}", addr))?;
            return Ok(Box::new(reader));
        }
        if !self.files.is_empty() {
            return Ok(Box::new(FileListSource::new(self.files.clone())));
        }
        bail!("no pulse source: give --file, --tcp or --simulate");
    }
}

/// Sets the returned flag on Ctrl-C. The runner sees it before its next packet.
fn install_stop_handler() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    thread::spawn(move || {
        let runtime = match TokioBuilder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!("no Ctrl-C handling: {}", err);
                return;
            }
        };
        runtime.block_on(async {
            if signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping after the current packet");
                flag.store(true, Ordering::Relaxed);
            }
        });
    });
    stop
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = args.monitor_config()?;
    let mut source = args.open_source(&config)?;
    let metrics = Arc::new(MetricsRecorder::new());

    let mut runner = Runner::new(config, metrics.clone())?;
    let bridge = if args.serve {
        let addr = args.serve_addr.unwrap_or_else(default_bind_address);
        Some(StatusBridge::spawn(addr, metrics.clone()))
    } else {
        None
    };
    if let Some(bridge) = &bridge {
        runner = runner.with_model(bridge.model());
    }

    let stop = install_stop_handler();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let snapshot = runner.execute(&mut source, &mut out, &stop)?;

    if snapshot.dwells_emitted == 0 {
        warn!("no complete dwell in {} pulses", snapshot.pulses_read);
    }
    Ok(())
}
