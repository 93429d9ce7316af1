use serde::{Deserialize, Serialize};

use crate::iwrf::MAX_CHAN;
use crate::math::StatsHelper;

/// Gains at or below this are "not available".
pub const GAIN_MISSING_THRESHOLD: f64 = -9990.0;

/// Receiver gains per channel, dB. Channel order is H co-polar, V co-polar,
/// H cross-polar, V cross-polar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub receiver_gain_db_hc: f64,
    pub receiver_gain_db_vc: f64,
    pub receiver_gain_db_hx: f64,
    pub receiver_gain_db_vx: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            receiver_gain_db_hc: -9999.0,
            receiver_gain_db_vc: -9999.0,
            receiver_gain_db_hx: -9999.0,
            receiver_gain_db_vx: -9999.0,
        }
    }
}

impl Calibration {
    pub fn gain_db(&self, channel: usize) -> Option<f64> {
        let gain = match channel {
            0 => self.receiver_gain_db_hc,
            1 => self.receiver_gain_db_vc,
            2 => self.receiver_gain_db_hx,
            3 => self.receiver_gain_db_vx,
            _ => return None,
        };
        (gain > GAIN_MISSING_THRESHOLD).then_some(gain)
    }

    /// Linear factor that measured power is divided by. 1.0 when the gain
    /// is not available.
    pub fn gain_correction(&self, channel: usize) -> f64 {
        self.gain_db(channel).map(StatsHelper::from_db).unwrap_or(1.0)
    }

    pub fn gain_corrections(&self) -> [f64; MAX_CHAN] {
        let mut gains = [1.0; MAX_CHAN];
        for (ch, gain) in gains.iter_mut().enumerate() {
            *gain = self.gain_correction(ch);
        }
        gains
    }
}
