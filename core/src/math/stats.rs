use num_complex::Complex32;

pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn peak(values: &[f64]) -> Option<f64> {
        values.iter().copied().reduce(f64::max)
    }

    /// Instantaneous power, I² + Q².
    pub fn power(iq: Complex32) -> f64 {
        let i = iq.re as f64;
        let q = iq.im as f64;
        i * i + q * q
    }

    /// Linear power to dB. Zero power gives negative infinity.
    pub fn to_db(power: f64) -> f64 {
        10.0 * power.log10()
    }

    /// dB to a linear factor.
    pub fn from_db(db: f64) -> f64 {
        10f64.powf(db / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn empty_sequence_has_no_mean_or_peak() {
        assert_eq!(StatsHelper::mean(&[]), None);
        assert_eq!(StatsHelper::peak(&[]), None);
    }

    #[test]
    fn mean_and_peak_of_values() {
        let values = [1.0, 4.0, 2.5];
        assert_approx_eq!(StatsHelper::mean(&values).unwrap(), 2.5, 1e-12);
        assert_eq!(StatsHelper::peak(&values), Some(4.0));
    }

    #[test]
    fn db_conversions_invert() {
        assert_approx_eq!(StatsHelper::to_db(100.0), 20.0, 1e-12);
        assert_approx_eq!(StatsHelper::from_db(-3.0), 0.501187, 1e-6);
        assert_eq!(StatsHelper::power(Complex32::new(3.0, 4.0)), 25.0);
    }
}
