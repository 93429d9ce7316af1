use std::sync::Mutex;

use log::info;
use serde::Serialize;

/// Run counters, shared between the consumer loop and the status bridge.
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub pulses_read: u64,
    pub decode_errors: u64,
    pub sequence_gaps: u64,
    pub missing_pulses: u64,
    pub georefs_read: u64,
    pub dwells_emitted: u64,
    pub dwells_aborted: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn update<F: FnOnce(&mut MetricsSnapshot)>(&self, f: F) {
        if let Ok(mut metrics) = self.inner.lock() {
            f(&mut metrics);
        }
    }

    pub fn record_pulse(&self) {
        self.update(|m| m.pulses_read += 1);
    }

    pub fn record_decode_error(&self) {
        self.update(|m| m.decode_errors += 1);
    }

    /// A sequence discontinuity; `missing` is the number of skipped pulses,
    /// zero for a backwards jump.
    pub fn record_gap(&self, missing: u64) {
        self.update(|m| {
            m.sequence_gaps += 1;
            m.missing_pulses += missing;
        });
    }

    pub fn record_georef(&self) {
        self.update(|m| m.georefs_read += 1);
    }

    pub fn record_dwell(&self) {
        self.update(|m| m.dwells_emitted += 1);
    }

    pub fn record_abort(&self) {
        self.update(|m| m.dwells_aborted += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|m| *m).unwrap_or_default()
    }

    pub fn log_summary(&self) {
        let m = self.snapshot();
        info!(
            "pulses {} decode errors {} gaps {} missing {} dwells {} aborted {}",
            m.pulses_read,
            m.decode_errors,
            m.sequence_gaps,
            m.missing_pulses,
            m.dwells_emitted,
            m.dwells_aborted
        );
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
