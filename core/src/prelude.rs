pub use crate::iwrf::codec::CodecContext;
pub use crate::iwrf::header::PulseHeader;
pub use crate::iwrf::pulse::{Pulse, SharedPulse};
pub use crate::iwrf::{IqEncoding, ScanMode, MAX_CHAN};
pub use crate::source::{PulseSource, SourceEvent};

/// Common error type for decoding and dwell processing.
#[derive(thiserror::Error, Debug)]
pub enum IwrfError {
    /// Malformed wire buffer: too short, bad packet id, unknown encoding.
    #[error("format error: {0}")]
    Format(String),
    /// Declared payload does not fit in the supplied buffer.
    #[error("range error: {0}")]
    Range(String),
    /// Inconsistent processing setup or pulse geometry within a dwell.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IwrfResult<T> = Result<T, IwrfError>;
