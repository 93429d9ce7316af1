//! Time-series core for IWRF radar pulse streams.
//!
//! The modules cover the pulse wire format (header, IQ payload encodings,
//! SIGMET packed floats), the shared pulse object, stream framing, and the
//! max-power dwell monitor that summarises fixed windows of pulses.

pub mod interface;
pub mod iwrf;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod source;
pub mod telemetry;

pub use prelude::{IwrfError, IwrfResult};
