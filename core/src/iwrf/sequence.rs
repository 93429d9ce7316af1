use log::warn;
use serde::Serialize;

/// A break in pulse sequence numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GapEvent {
    pub prev_seq: i64,
    pub seq: i64,
    /// Pulses missing between the two, `seq - prev_seq - 1`. Negative when
    /// the sequence ran backwards.
    pub gap: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    First,
    Contiguous,
    Gap(GapEvent),
}

/// Watches pulse sequence numbers for drops and restarts.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    prev_seq: Option<i64>,
    n_gaps: u64,
    n_missing: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next sequence number. Each discontinuity is logged once
    /// and counted.
    pub fn check(&mut self, seq: i64) -> SequenceStatus {
        let status = match self.prev_seq {
            None => SequenceStatus::First,
            Some(prev) if seq == prev.wrapping_add(1) => SequenceStatus::Contiguous,
            Some(prev) => {
                let gap = seq.wrapping_sub(prev).wrapping_sub(1);
                warn!(
                    "pulse sequence gap: prev {} this {} missing {}",
                    prev, seq, gap
                );
                self.n_gaps += 1;
                if gap > 0 {
                    self.n_missing += gap as u64;
                }
                SequenceStatus::Gap(GapEvent {
                    prev_seq: prev,
                    seq,
                    gap,
                })
            }
        };
        self.prev_seq = Some(seq);
        status
    }

    pub fn reset(&mut self) {
        self.prev_seq = None;
    }

    pub fn last_seq(&self) -> Option<i64> {
        self.prev_seq
    }

    pub fn n_gaps(&self) -> u64 {
        self.n_gaps
    }

    pub fn n_missing(&self) -> u64 {
        self.n_missing
    }
}
