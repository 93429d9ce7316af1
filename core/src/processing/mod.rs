pub mod calibration;
pub mod dwell;

pub use calibration::Calibration;
pub use dwell::{DwellAggregator, DwellConfig, FoldOutcome};
