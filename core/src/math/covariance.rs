use std::f64::consts::PI;

use num_complex::Complex64;

/// Lag-1 autocovariance and the radial velocity derived from it.
pub struct CovarianceHelper;

impl CovarianceHelper {
    /// Mean of `x[k+1] * conj(x[k])`. `None` with fewer than two samples.
    pub fn lag1(iq: &[Complex64]) -> Option<Complex64> {
        if iq.len() < 2 {
            return None;
        }
        let sum: Complex64 = iq.windows(2).map(|w| w[1] * w[0].conj()).sum();
        Some(sum / (iq.len() - 1) as f64)
    }

    /// Velocity from lag-1 phase; positive is away from the radar.
    pub fn velocity_from_lag1(lag1: Complex64, nyquist: f64) -> f64 {
        -(lag1.arg() / PI) * nyquist
    }

    pub fn nyquist(wavelength_m: f64, prt: f64) -> f64 {
        wavelength_m / prt / 4.0
    }

    /// Fold a velocity back into `[-nyquist, nyquist]`.
    pub fn fold_nyquist(mut vel: f64, nyquist: f64) -> f64 {
        if !(nyquist > 0.0) || !vel.is_finite() {
            return vel;
        }
        while vel > nyquist {
            vel -= 2.0 * nyquist;
        }
        while vel < -nyquist {
            vel += 2.0 * nyquist;
        }
        vel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn lag1_recovers_phase_step() {
        let theta = 0.3;
        let iq: Vec<Complex64> = (0..32)
            .map(|k| Complex64::from_polar(1.0, theta * k as f64))
            .collect();
        let lag1 = CovarianceHelper::lag1(&iq).unwrap();
        assert_approx_eq!(lag1.arg(), theta, 1e-12);
        assert_approx_eq!(lag1.norm(), 1.0, 1e-12);
        assert_approx_eq!(
            CovarianceHelper::velocity_from_lag1(lag1, 8.0),
            -theta / PI * 8.0,
            1e-12
        );
    }

    #[test]
    fn lag1_needs_two_samples() {
        assert!(CovarianceHelper::lag1(&[Complex64::new(1.0, 0.0)]).is_none());
    }

    #[test]
    fn folding_wraps_into_interval() {
        assert_approx_eq!(CovarianceHelper::fold_nyquist(9.0, 8.0), -7.0, 1e-12);
        assert_approx_eq!(CovarianceHelper::fold_nyquist(-25.0, 8.0), 7.0, 1e-12);
        assert_eq!(CovarianceHelper::fold_nyquist(3.0, 8.0), 3.0);
        assert_approx_eq!(CovarianceHelper::nyquist(0.1, 0.001), 25.0, 1e-12);
    }
}
