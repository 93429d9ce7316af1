use crate::status_bridge::model::SharedModel;
use crate::workflow::config::{MonitorConfig, OutputFormat};
use anyhow::Context;
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tscore::interface::{PlatformGeoref, StatusRecord};
use tscore::iwrf::{
    packet_id_order, CodecContext, Pulse, SequenceStatus, SequenceTracker, SharedPulse,
    PLATFORM_GEOREF_ID, PULSE_HEADER_ID,
};
use tscore::prelude::{IwrfError, PulseSource, SourceEvent};
use tscore::processing::{DwellAggregator, FoldOutcome};
use tscore::telemetry::{MetricsRecorder, MetricsSnapshot};

/// Text output repeats the column labels every this many lines.
const LABEL_INTERVAL: usize = 40;

/// Consumer loop: reads packets, decodes pulses and folds them into dwells,
/// writing one status record per completed dwell.
pub struct Runner {
    config: MonitorConfig,
    codec: CodecContext,
    aggregator: DwellAggregator,
    tracker: SequenceTracker,
    history: VecDeque<SharedPulse>,
    metrics: Arc<MetricsRecorder>,
    model: Option<SharedModel>,
    lines_written: usize,
}

impl Runner {
    pub fn new(config: MonitorConfig, metrics: Arc<MetricsRecorder>) -> anyhow::Result<Self> {
        let calibration = config.load_calibration()?;
        let aggregator = DwellAggregator::new(config.to_dwell_config(), &calibration)
            .context("configuring dwell aggregator")?;
        Ok(Self {
            codec: config.codec_context(),
            config,
            aggregator,
            tracker: SequenceTracker::new(),
            history: VecDeque::new(),
            metrics,
            model: None,
            lines_written: 0,
        })
    }

    /// Publish each completed record to the status bridge as well.
    pub fn with_model(mut self, model: SharedModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Run until end of stream, a stream-fatal error, or `stop` is set.
    /// `stop` is checked between packets.
    pub fn execute<S: PulseSource, W: Write>(
        &mut self,
        source: &mut S,
        out: &mut W,
        stop: &AtomicBool,
    ) -> anyhow::Result<MetricsSnapshot> {
        info!(
            "max power monitor: {} samples per dwell, start gate {}",
            self.config.n_samples, self.config.start_gate
        );
        self.tracker.reset();

        loop {
            if stop.load(Ordering::Relaxed) {
                info!("stop requested");
                self.discard_partial_dwell();
                break;
            }
            match source.next_event().context("reading pulse source")? {
                SourceEvent::Packet(buf) => self.handle_packet(&buf, out)?,
                SourceEvent::Timeout => {
                    warn!("timed out waiting for pulses");
                    if self.config.discard_dwell_on_timeout {
                        self.discard_partial_dwell();
                    }
                }
                SourceEvent::EndOfStream => {
                    info!("end of pulse stream");
                    self.discard_partial_dwell();
                    break;
                }
            }
        }

        self.metrics.log_summary();
        Ok(self.metrics.snapshot())
    }

    fn discard_partial_dwell(&mut self) {
        let seen = self.aggregator.pulses_seen();
        if self.aggregator.abort() {
            info!("discarding partial dwell of {} pulses", seen);
            self.metrics.record_abort();
        }
    }

    fn handle_packet<W: Write>(&mut self, buf: &[u8], out: &mut W) -> anyhow::Result<()> {
        if buf.len() < 4 {
            return Ok(());
        }
        let raw = [buf[0], buf[1], buf[2], buf[3]];
        let id = match packet_id_order(raw) {
            Some(true) => i32::from_be_bytes(raw),
            Some(false) => i32::from_le_bytes(raw),
            None => return Ok(()),
        };
        match id {
            PULSE_HEADER_ID => self.handle_pulse(buf, out),
            PLATFORM_GEOREF_ID => {
                match PlatformGeoref::decode(buf) {
                    Ok(georef) => {
                        trace!("platform georef, vert velocity {}", georef.vert_velocity_mps);
                        self.metrics.record_georef();
                        self.aggregator.set_georef(georef);
                    }
                    Err(err) => warn!("skipping platform georef: {}", err),
                }
                Ok(())
            }
            other => {
                trace!("ignoring packet id 0x{:x}", other);
                Ok(())
            }
        }
    }

    fn handle_pulse<W: Write>(&mut self, buf: &[u8], out: &mut W) -> anyhow::Result<()> {
        let mut pulse = match Pulse::from_buffer(buf, self.codec, true) {
            Ok(pulse) => pulse,
            Err(err) => {
                warn!("skipping pulse: {}", err);
                self.metrics.record_decode_error();
                return Ok(());
            }
        };
        pulse.set_invert_hv_flag(self.config.invert_hv_flag);
        self.metrics.record_pulse();

        if let SequenceStatus::Gap(event) = self.tracker.check(pulse.seq_num()) {
            self.metrics.record_gap(event.gap.max(0) as u64);
        }

        if self.config.cohere_to_burst {
            if let Err(err) = pulse.cohere_iq_to_burst_phase() {
                warn!("skipping pulse {}: {}", pulse.seq_num(), err);
                self.metrics.record_decode_error();
                return Ok(());
            }
        }
        let max_trips = self.config.max_trips;
        if max_trips > 1 {
            pulse.compute_phase_diffs(self.history.make_contiguous(), max_trips);
        }

        debug!(
            "pulse {} el {:.2} az {:.2} gates {}",
            pulse.seq_num(),
            pulse.el(),
            pulse.az(),
            pulse.n_gates()
        );

        match self.aggregator.fold(&pulse) {
            Ok(FoldOutcome::Collecting(_)) => {}
            Ok(FoldOutcome::Complete(record)) => self.emit(&record, out)?,
            Err(IwrfError::Configuration(msg)) => {
                warn!("dwell aborted: {}", msg);
                self.metrics.record_abort();
            }
            Err(err) => {
                warn!("dwell aborted: {}", err);
                self.aggregator.abort();
                self.metrics.record_abort();
            }
        }

        if max_trips > 1 {
            self.history.push_front(pulse.share());
            self.history.truncate(max_trips - 1);
        }
        Ok(())
    }

    fn emit<W: Write>(&mut self, record: &StatusRecord, out: &mut W) -> anyhow::Result<()> {
        let written = match self.config.output_format {
            OutputFormat::Xml => out.write_all(record.to_xml().as_bytes()),
            OutputFormat::Text => {
                if self.lines_written % LABEL_INTERVAL == 0 {
                    writeln!(
                        out,
                        "{}",
                        StatusRecord::text_labels(record.channels.len(), record.units)
                    )
                    .context("writing status labels")?;
                }
                writeln!(out, "{}", record.to_text_line())
            }
            OutputFormat::Json => writeln!(out, "{}", record.to_json()?),
        };
        written.context("writing status record")?;
        out.flush().context("flushing status output")?;

        self.lines_written += 1;
        self.metrics.record_dwell();
        if let Some(model) = &self.model {
            if let Ok(mut guard) = model.write() {
                guard.publish(record);
            }
        }
        Ok(())
    }
}
