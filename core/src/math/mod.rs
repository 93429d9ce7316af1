pub mod covariance;
pub mod stats;

pub use covariance::CovarianceHelper;
pub use stats::StatsHelper;
