use log::{debug, info, warn};
use num_complex::Complex64;

use crate::interface::{ChannelStatus, DistanceUnits, PlatformGeoref, StatusRecord};
use crate::iwrf::{Pulse, MAX_CHAN};
use crate::math::{CovarianceHelper, StatsHelper};
use crate::prelude::{IwrfError, IwrfResult};
use crate::processing::calibration::Calibration;

#[derive(Debug, Clone, PartialEq)]
pub struct DwellConfig {
    /// Pulses per dwell.
    pub n_samples: usize,
    pub start_gate: usize,
    /// Gates searched from `start_gate`; all remaining gates when `None`.
    pub n_gates: Option<usize>,
    pub units: DistanceUnits,
    /// Needed for velocity; velocity is reported missing without it.
    pub wavelength_m: Option<f64>,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            n_samples: 64,
            start_gate: 0,
            n_gates: None,
            units: DistanceUnits::Meters,
            wavelength_m: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FoldOutcome {
    /// Pulses folded into the current dwell so far.
    Collecting(usize),
    Complete(StatusRecord),
}

#[derive(Debug, Clone, Default)]
struct ChannelAccum {
    max_powers: Vec<f64>,
    max_gates: Vec<usize>,
    iq_at_tracked: Vec<Complex64>,
}

#[derive(Debug, Clone, Copy)]
struct MidDwell {
    time: f64,
    prt: f64,
    el: f64,
    az: f64,
}

/// Folds pulses into fixed windows of `n_samples` and summarises each full
/// window as a [`StatusRecord`].
///
/// Per pulse and channel the aggregator finds the strongest gate in the
/// search window. At the end of a dwell the rounded mean of those gates
/// becomes the tracked gate for the next dwell, and the IQ collected at the
/// tracked gate gives the velocity. Pulses are only borrowed while folded.
pub struct DwellAggregator {
    config: DwellConfig,
    gains: [f64; MAX_CHAN],
    tracked_gate: [usize; MAX_CHAN],
    georef: Option<PlatformGeoref>,
    channels: Vec<ChannelAccum>,
    pulse_count: usize,
    start_time: f64,
    end_time: f64,
    mid: Option<MidDwell>,
    start_range_m: f64,
    gate_spacing_m: f64,
    n_gates_used: usize,
}

impl DwellAggregator {
    pub fn new(config: DwellConfig, calibration: &Calibration) -> IwrfResult<Self> {
        if config.n_samples < 2 {
            return Err(IwrfError::Configuration(format!(
                "n_samples must be at least 2, got {}",
                config.n_samples
            )));
        }
        if config.n_gates == Some(0) {
            return Err(IwrfError::Configuration("n_gates must be positive".to_string()));
        }
        Ok(Self {
            config,
            gains: calibration.gain_corrections(),
            tracked_gate: [0; MAX_CHAN],
            georef: None,
            channels: Vec::new(),
            pulse_count: 0,
            start_time: 0.0,
            end_time: 0.0,
            mid: None,
            start_range_m: 0.0,
            gate_spacing_m: 0.0,
            n_gates_used: 0,
        })
    }

    pub fn config(&self) -> &DwellConfig {
        &self.config
    }

    pub fn pulses_seen(&self) -> usize {
        self.pulse_count
    }

    /// Gate whose IQ is collected for velocity on `channel`.
    pub fn tracked_gate(&self, channel: usize) -> Option<usize> {
        self.tracked_gate.get(channel).copied()
    }

    /// Latest platform georeference, used for the vertical motion
    /// correction of velocity.
    pub fn set_georef(&mut self, georef: PlatformGeoref) {
        self.georef = Some(georef);
    }

    pub fn set_calibration(&mut self, calibration: &Calibration) {
        self.gains = calibration.gain_corrections();
    }

    /// Discard the partial dwell. Returns true if any pulses were dropped.
    pub fn abort(&mut self) -> bool {
        let dropped = self.pulse_count > 0;
        if dropped {
            debug!("discarding partial dwell of {} pulses", self.pulse_count);
        }
        self.reset();
        dropped
    }

    /// Add one pulse to the current dwell. A pulse that does not fit the
    /// dwell (channel count change, search window beyond its gates) aborts
    /// the dwell and is returned as a configuration error.
    pub fn fold(&mut self, pulse: &Pulse) -> IwrfResult<FoldOutcome> {
        let n_channels = pulse.n_channels();
        if self.pulse_count > 0 && n_channels != self.channels.len() {
            let msg = format!(
                "channel count changed from {} to {} within dwell",
                self.channels.len(),
                n_channels
            );
            self.abort();
            return Err(IwrfError::Configuration(msg));
        }
        if n_channels == 0 || n_channels > MAX_CHAN {
            self.abort();
            return Err(IwrfError::Configuration(format!(
                "cannot process {} channels",
                n_channels
            )));
        }

        let (start_gate, end_gate) = match self.gate_window(pulse) {
            Some(window) => window,
            None => {
                let msg = format!(
                    "start gate {} beyond pulse with {} gates",
                    self.config.start_gate,
                    pulse.n_gates()
                );
                self.abort();
                return Err(IwrfError::Configuration(msg));
            }
        };

        self.save_metadata(pulse, end_gate + 1 - start_gate);

        for ch in 0..n_channels {
            let gain = self.gains[ch];
            let mut max_power = f64::NEG_INFINITY;
            let mut gate_for_max = start_gate;
            for gate in start_gate..=end_gate {
                if let Some(iq) = pulse.get_iq(ch, gate) {
                    let power = StatsHelper::power(iq) / gain;
                    if power > max_power {
                        max_power = power;
                        gate_for_max = gate;
                    }
                }
            }

            let tracked = self.tracked_gate[ch];
            let accum = &mut self.channels[ch];
            accum.max_powers.push(max_power);
            accum.max_gates.push(gate_for_max);
            if gate_for_max == tracked {
                if let Some(iq) = pulse.get_iq(ch, tracked) {
                    accum
                        .iq_at_tracked
                        .push(Complex64::new(iq.re as f64, iq.im as f64));
                }
            }
        }

        self.pulse_count += 1;
        if self.pulse_count < self.config.n_samples {
            return Ok(FoldOutcome::Collecting(self.pulse_count));
        }

        let record = self.finalize();
        self.reset();
        Ok(FoldOutcome::Complete(record))
    }

    fn gate_window(&self, pulse: &Pulse) -> Option<(usize, usize)> {
        let start = self.config.start_gate;
        if start >= pulse.n_gates() {
            return None;
        }
        let last = pulse.n_gates() - 1;
        let end = match self.config.n_gates {
            Some(n) => (start + n - 1).min(last),
            None => last,
        };
        Some((start, end))
    }

    fn save_metadata(&mut self, pulse: &Pulse, n_gates: usize) {
        let time = pulse.ftime();
        if self.pulse_count == 0 {
            self.start_time = time;
            self.start_range_m = pulse.header().start_range_m as f64;
            self.gate_spacing_m = pulse.header().gate_spacing_m as f64;
            self.n_gates_used = n_gates;
            self.channels = vec![ChannelAccum::default(); pulse.n_channels()];
        }
        if self.pulse_count == self.config.n_samples / 2 {
            self.mid = Some(MidDwell {
                time,
                prt: pulse.prt(),
                el: pulse.el(),
                az: pulse.az(),
            });
        }
        self.end_time = time;
    }

    fn finalize(&mut self) -> StatusRecord {
        let n_samples = self.config.n_samples;
        let mid = self.mid.unwrap_or(MidDwell {
            time: self.end_time,
            prt: 0.0,
            el: 0.0,
            az: 0.0,
        });
        let prf = if mid.prt > 0.0 { 1.0 / mid.prt } else { crate::iwrf::MISSING_DOUBLE };
        let dwell_secs =
            (self.end_time - self.start_time) * (n_samples as f64 / (n_samples as f64 - 1.0));

        let mut channels = Vec::with_capacity(self.channels.len());
        for (ch, accum) in self.channels.iter().enumerate() {
            let mean_power = StatsHelper::mean(&accum.max_powers).unwrap_or(0.0);
            let peak_power = StatsHelper::peak(&accum.max_powers).unwrap_or(0.0);
            let gates: Vec<f64> = accum.max_gates.iter().map(|&g| g as f64).collect();
            let mean_gate = StatsHelper::mean(&gates).unwrap_or(0.0);
            let gate_for_max = (mean_gate + 0.5).floor() as usize;
            let range_m = self.start_range_m + gate_for_max as f64 * self.gate_spacing_m;

            let vel = self.velocity(&accum.iq_at_tracked, &mid);
            if vel.is_none() {
                debug!(
                    "channel {}: {} of {} samples at gate {}, no velocity",
                    ch,
                    accum.iq_at_tracked.len(),
                    n_samples,
                    self.tracked_gate[ch]
                );
            }
            self.tracked_gate[ch] = gate_for_max;

            channels.push(ChannelStatus {
                mean_max_dbm: StatsHelper::to_db(mean_power),
                peak_max_dbm: StatsHelper::to_db(peak_power),
                range_to_max: self.config.units.from_meters(range_m),
                vel,
            });
        }

        let (time_secs, msecs) = StatusRecord::split_time(mid.time);
        let record = StatusRecord {
            time_secs,
            msecs,
            dwell_secs,
            prf,
            n_samples,
            start_gate: self.config.start_gate,
            n_gates: self.n_gates_used,
            el: mid.el,
            az: mid.az,
            units: self.config.units,
            channels,
        };
        if let Some(first) = record.channels.first() {
            info!(
                "dwell complete: el {:.2} az {:.2} maxDbm0 {:.2} range0 {:.0}{}",
                record.el,
                record.az,
                first.mean_max_dbm,
                first.range_to_max,
                record.units.label()
            );
        }
        record
    }

    fn velocity(&self, iq: &[Complex64], mid: &MidDwell) -> Option<f64> {
        if iq.len() != self.config.n_samples {
            return None;
        }
        let wavelength = self.config.wavelength_m?;
        if !(mid.prt > 0.0) {
            warn!("no valid prt at mid dwell, velocity not computed");
            return None;
        }
        let nyquist = CovarianceHelper::nyquist(wavelength, mid.prt);
        let lag1 = CovarianceHelper::lag1(iq)?;
        let mut vel = CovarianceHelper::velocity_from_lag1(lag1, nyquist);

        if let Some(vert) = self.georef.as_ref().and_then(|g| g.vert_velocity()) {
            vel += vert * mid.el.to_radians().sin();
            vel = CovarianceHelper::fold_nyquist(vel, nyquist);
        }
        Some(vel)
    }

    fn reset(&mut self) {
        self.channels.clear();
        self.pulse_count = 0;
        self.start_time = 0.0;
        self.end_time = 0.0;
        self.mid = None;
        self.n_gates_used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iwrf::CodecContext;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::Array2;
    use num_complex::Complex32;
    use std::f64::consts::PI;

    const START_RANGE: f32 = 150.0;
    const SPACING: f32 = 75.0;

    /// Pulse with `signal(k)` at `gate` on channel 0, weak noise elsewhere.
    fn pulse_with(k: usize, n_gates: usize, n_channels: usize, gate: usize, signal: Complex32) -> Pulse {
        let mut iq = Array2::from_elem((n_channels, n_gates), Complex32::new(1.0e-4, 0.0));
        iq[[0, gate]] = signal;
        let mut pulse = Pulse::new(CodecContext::default());
        pulse.set_iq_channels(iq).unwrap();
        pulse.set_seq_num(k as i64);
        pulse.set_time(1_700_000_000, (k * 1_000_000) as i32);
        let header = pulse.header_mut();
        header.prt = 0.001;
        header.elevation_deg = 2.0;
        header.azimuth_deg = 45.0 + k as f32 * 0.01;
        header.start_range_m = START_RANGE;
        header.gate_spacing_m = SPACING;
        pulse
    }

    fn run_dwell(agg: &mut DwellAggregator, pulses: impl Iterator<Item = Pulse>) -> Option<StatusRecord> {
        let mut record = None;
        for pulse in pulses {
            if let FoldOutcome::Complete(r) = agg.fold(&pulse).unwrap() {
                assert!(record.is_none(), "more than one record");
                record = Some(r);
            }
        }
        record
    }

    #[test]
    fn constant_power_gives_exact_dbm_and_range() {
        let p = 0.25f64;
        let amp = p.sqrt() as f32;
        let mut agg = DwellAggregator::new(DwellConfig::default(), &Calibration::default()).unwrap();
        let record = run_dwell(
            &mut agg,
            (0..64).map(|k| pulse_with(k, 50, 1, 10, Complex32::new(amp, 0.0))),
        )
        .unwrap();

        let ch0 = &record.channels[0];
        assert_approx_eq!(ch0.mean_max_dbm, 10.0 * p.log10(), 1e-5);
        assert_approx_eq!(ch0.peak_max_dbm, 10.0 * p.log10(), 1e-5);
        assert_approx_eq!(ch0.range_to_max, (START_RANGE + 10.0 * SPACING) as f64, 1e-6);
        assert_eq!(record.n_samples, 64);
        assert_eq!(record.n_gates, 50);
        assert_approx_eq!(record.prf, 1000.0, 1e-3);
        // time at pulse 32
        assert_eq!(record.time_secs, 1_700_000_000);
        assert_eq!(record.msecs, 32);
        assert_approx_eq!(record.az, 45.32, 1e-4);
        assert_approx_eq!(record.dwell_secs, 0.064, 1e-6);
        assert_eq!(agg.tracked_gate(0), Some(10));
        assert_eq!(agg.pulses_seen(), 0);
    }

    #[test]
    fn two_channel_dwell_reports_each_channel() {
        let (theta0, theta1) = (0.4f64, -0.6f64);
        let config = DwellConfig {
            n_samples: 16,
            wavelength_m: Some(0.1),
            ..Default::default()
        };
        let calibration = Calibration {
            receiver_gain_db_vc: 10.0,
            ..Default::default()
        };
        let mut agg = DwellAggregator::new(config, &calibration).unwrap();
        let phasor = |amp: f64, theta: f64, k: usize| {
            let c = Complex64::from_polar(amp, theta * k as f64);
            Complex32::new(c.re as f32, c.im as f32)
        };
        let two_channel = |k: usize| {
            let mut pulse = pulse_with(k, 40, 2, 10, phasor(1.0, theta0, k));
            let mut iq = Array2::from_elem((2, 40), Complex32::new(1.0e-4, 0.0));
            iq[[0, 10]] = phasor(1.0, theta0, k);
            iq[[1, 25]] = phasor(0.2, theta1, k);
            pulse.set_iq_channels(iq).unwrap();
            pulse
        };

        let first = run_dwell(&mut agg, (0..16).map(two_channel)).unwrap();
        assert_eq!(first.channels.len(), 2);
        assert!(first.channels.iter().all(|c| c.vel.is_none()));
        assert_eq!(agg.tracked_gate(0), Some(10));
        assert_eq!(agg.tracked_gate(1), Some(25));

        let second = run_dwell(&mut agg, (16..32).map(two_channel)).unwrap();
        let (ch0, ch1) = (&second.channels[0], &second.channels[1]);
        assert_approx_eq!(ch0.mean_max_dbm, 0.0, 1e-4);
        assert_approx_eq!(ch0.peak_max_dbm, 0.0, 1e-4);
        // 0.04 of power less the 10 dB vc gain
        assert_approx_eq!(ch1.mean_max_dbm, 10.0 * 0.004f64.log10(), 1e-4);
        assert_approx_eq!(ch1.peak_max_dbm, 10.0 * 0.004f64.log10(), 1e-4);
        assert_approx_eq!(ch0.range_to_max, (START_RANGE + 10.0 * SPACING) as f64, 1e-6);
        assert_approx_eq!(ch1.range_to_max, (START_RANGE + 25.0 * SPACING) as f64, 1e-6);

        let nyquist = 0.1 / 0.001 / 4.0;
        assert_approx_eq!(ch0.vel.unwrap(), -theta0 / PI * nyquist, 1e-3);
        assert_approx_eq!(ch1.vel.unwrap(), -theta1 / PI * nyquist, 1e-3);
    }

    #[test]
    fn range_in_feet() {
        let config = DwellConfig {
            n_samples: 4,
            units: DistanceUnits::Feet,
            ..Default::default()
        };
        let mut agg = DwellAggregator::new(config, &Calibration::default()).unwrap();
        let record = run_dwell(
            &mut agg,
            (0..4).map(|k| pulse_with(k, 20, 1, 4, Complex32::new(1.0, 0.0))),
        )
        .unwrap();
        let meters = (START_RANGE + 4.0 * SPACING) as f64;
        assert_approx_eq!(record.channels[0].range_to_max, meters / 0.3048, 1e-6);
    }

    #[test]
    fn rotating_phasor_gives_expected_velocity() {
        let theta = 0.4f64;
        let wavelength = 0.1;
        let config = DwellConfig {
            wavelength_m: Some(wavelength),
            ..Default::default()
        };
        let mut agg = DwellAggregator::new(config, &Calibration::default()).unwrap();
        let phasor = |k: usize| {
            let c = Complex64::from_polar(1.0, theta * k as f64);
            Complex32::new(c.re as f32, c.im as f32)
        };

        // first dwell locks the tracked gate onto gate 10
        let first = run_dwell(&mut agg, (0..64).map(|k| pulse_with(k, 30, 1, 10, phasor(k)))).unwrap();
        assert!(first.channels[0].vel.is_none());
        assert_eq!(agg.tracked_gate(0), Some(10));

        let second =
            run_dwell(&mut agg, (64..128).map(|k| pulse_with(k, 30, 1, 10, phasor(k)))).unwrap();
        let nyquist = wavelength / 0.001 / 4.0;
        assert_approx_eq!(second.channels[0].vel.unwrap(), -theta / PI * nyquist, 1e-3);
    }

    #[test]
    fn vertical_platform_motion_is_removed() {
        let config = DwellConfig {
            n_samples: 8,
            wavelength_m: Some(0.1),
            ..Default::default()
        };
        let mut agg = DwellAggregator::new(config, &Calibration::default()).unwrap();
        agg.set_georef(PlatformGeoref {
            vert_velocity_mps: 10.0,
            ..Default::default()
        });
        let record =
            run_dwell(&mut agg, (0..8).map(|k| pulse_with(k, 8, 1, 0, Complex32::new(1.0, 0.0)))).unwrap();
        // stationary target, tracked gate 0 from the start
        assert_approx_eq!(record.channels[0].vel.unwrap(), 10.0 * 2f64.to_radians().sin(), 1e-4);
    }

    #[test]
    fn partial_dwell_emits_nothing() {
        let mut agg = DwellAggregator::new(DwellConfig::default(), &Calibration::default()).unwrap();
        let record = run_dwell(
            &mut agg,
            (0..63).map(|k| pulse_with(k, 20, 1, 3, Complex32::new(1.0, 0.0))),
        );
        assert!(record.is_none());
        assert_eq!(agg.pulses_seen(), 63);
        assert!(agg.abort());
        assert_eq!(agg.pulses_seen(), 0);
        assert!(!agg.abort());
    }

    #[test]
    fn channel_count_change_aborts_dwell() {
        let mut agg = DwellAggregator::new(DwellConfig::default(), &Calibration::default()).unwrap();
        for k in 0..5 {
            agg.fold(&pulse_with(k, 20, 2, 3, Complex32::new(1.0, 0.0))).unwrap();
        }
        let err = agg
            .fold(&pulse_with(5, 20, 1, 3, Complex32::new(1.0, 0.0)))
            .unwrap_err();
        assert!(matches!(err, IwrfError::Configuration(_)));
        assert_eq!(agg.pulses_seen(), 0);
        assert!(matches!(
            agg.fold(&pulse_with(6, 20, 1, 3, Complex32::new(1.0, 0.0))).unwrap(),
            FoldOutcome::Collecting(1)
        ));
    }

    #[test]
    fn start_gate_beyond_pulse_is_rejected() {
        let config = DwellConfig {
            start_gate: 40,
            ..Default::default()
        };
        let mut agg = DwellAggregator::new(config, &Calibration::default()).unwrap();
        let err = agg
            .fold(&pulse_with(0, 20, 1, 3, Complex32::new(1.0, 0.0)))
            .unwrap_err();
        assert!(matches!(err, IwrfError::Configuration(_)));
    }

    #[test]
    fn search_window_excludes_earlier_gates() {
        let config = DwellConfig {
            n_samples: 2,
            start_gate: 5,
            n_gates: Some(10),
            ..Default::default()
        };
        let mut agg = DwellAggregator::new(config, &Calibration::default()).unwrap();
        // strongest gate is 2, outside the window
        let record = run_dwell(
            &mut agg,
            (0..2).map(|k| pulse_with(k, 40, 1, 2, Complex32::new(5.0, 0.0))),
        )
        .unwrap();
        assert_eq!(record.n_gates, 10);
        assert_eq!(record.start_gate, 5);
        assert_approx_eq!(record.channels[0].mean_max_dbm, 10.0 * (1.0e-8f64).log10(), 1e-3);
    }

    #[test]
    fn receiver_gain_divides_power() {
        let cal = Calibration {
            receiver_gain_db_hc: 20.0,
            ..Default::default()
        };
        let config = DwellConfig {
            n_samples: 2,
            ..Default::default()
        };
        let mut agg = DwellAggregator::new(config, &cal).unwrap();
        let record = run_dwell(
            &mut agg,
            (0..2).map(|k| pulse_with(k, 10, 1, 1, Complex32::new(1.0, 0.0))),
        )
        .unwrap();
        assert_approx_eq!(record.channels[0].mean_max_dbm, -20.0, 1e-6);
    }

    #[test]
    fn rejects_degenerate_dwell_sizes() {
        let config = DwellConfig {
            n_samples: 1,
            ..Default::default()
        };
        assert!(DwellAggregator::new(config, &Calibration::default()).is_err());
    }
}
