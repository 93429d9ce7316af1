pub mod georef;
pub mod status;

pub use georef::PlatformGeoref;
pub use status::{ChannelStatus, DistanceUnits, StatusRecord};
