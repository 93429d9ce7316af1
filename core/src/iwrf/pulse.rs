use std::sync::Arc;

use ndarray::{s, Array2, ArrayView1};
use num_complex::{Complex32, Complex64};

use crate::iwrf::codec::{self, CodecContext, ZERO_POWER_FLOOR};
use crate::iwrf::header::{PulseHeader, PULSE_HEADER_LEN};
use crate::iwrf::{IqEncoding, ScanMode, MAX_TRIPS, MISSING_DOUBLE};
use crate::prelude::{IwrfError, IwrfResult};

/// Handle for a pulse retained by more than one consumer.
///
/// The pulse is dropped when the last handle goes away.
pub type SharedPulse = Arc<Pulse>;

#[derive(Debug, Clone)]
enum IqStore {
    /// Decoded samples, `[channel, gate]`, burst gates first.
    Float(Array2<Complex32>),
    /// Interleaved I,Q codes in one of the 16-bit encodings.
    Packed {
        encoding: IqEncoding,
        codes: Vec<i16>,
        scale: f32,
        offset: f32,
    },
}

/// One radar pulse: header, IQ samples and burst-phase bookkeeping.
///
/// Samples are held either decoded to floats or in their packed 16-bit form,
/// never both. Conversions are explicit.
#[derive(Debug, Clone)]
pub struct Pulse {
    header: PulseHeader,
    iq: IqStore,
    codec: CodecContext,
    invert_hv_flag: bool,
    phase_diffs: Vec<f64>,
    burst_phases: Vec<Complex64>,
}

impl Pulse {
    pub fn new(codec: CodecContext) -> Self {
        // the default header already describes an empty float store
        Self {
            header: PulseHeader::default(),
            iq: IqStore::Float(Array2::zeros((1, 0))),
            codec,
            invert_hv_flag: false,
            phase_diffs: Vec::new(),
            burst_phases: Vec::new(),
        }
    }

    /// Decode a pulse packet. With `convert_to_float` false, 16-bit packed
    /// payloads are retained as-is until [`Pulse::convert_to_fl32`].
    pub fn from_buffer(buf: &[u8], codec: CodecContext, convert_to_float: bool) -> IwrfResult<Self> {
        let (mut header, order) = PulseHeader::decode_with_order(buf)?;

        if header.elevation_deg > 180.0 {
            header.elevation_deg -= 360.0;
        }
        relabel_vertical_scan(&mut header);

        let n_values = header.n_data_min();
        if header.n_data < n_values {
            log::trace!(
                "pulse {} n_data {} below geometry minimum {}",
                header.pulse_seq_num,
                header.n_data,
                n_values
            );
            header.n_data = n_values;
        }

        let required = PULSE_HEADER_LEN + header.payload_len();
        if buf.len() < required {
            return Err(IwrfError::Range(format!(
                "pulse {} needs {} bytes, buffer has {}",
                header.pulse_seq_num,
                required,
                buf.len()
            )));
        }
        let payload = &buf[PULSE_HEADER_LEN..];

        let iq = match header.iq_encoding {
            IqEncoding::Fl32 => {
                let flat = codec::decode_fl32(payload, order, n_values)?;
                IqStore::Float(codec::to_channels(&flat, header.n_channels, header.n_gates_total()))
            }
            IqEncoding::ScaledSi32 => {
                let flat = codec::decode_scaled_si32(
                    payload,
                    order,
                    n_values,
                    header.scale,
                    header.offset,
                )?;
                IqStore::Float(codec::to_channels(&flat, header.n_channels, header.n_gates_total()))
            }
            encoding => IqStore::Packed {
                encoding,
                codes: codec::read_si16(payload, order, n_values)?,
                scale: header.scale,
                offset: header.offset,
            },
        };

        let mut pulse = Self {
            header,
            iq,
            codec,
            invert_hv_flag: false,
            phase_diffs: Vec::new(),
            burst_phases: Vec::new(),
        };
        pulse.sync_header()?;
        if convert_to_float {
            pulse.convert_to_fl32()?;
        }
        Ok(pulse)
    }

    /// Replace this pulse with one decoded from `buf`. On error the pulse is
    /// left untouched.
    pub fn set_from_buffer(&mut self, buf: &[u8], convert_to_float: bool) -> IwrfResult<()> {
        let mut decoded = Self::from_buffer(buf, self.codec, convert_to_float)?;
        decoded.invert_hv_flag = self.invert_hv_flag;
        *self = decoded;
        Ok(())
    }

    pub fn share(self) -> SharedPulse {
        Arc::new(self)
    }

    /// Number of live handles to a shared pulse.
    pub fn n_clients(pulse: &SharedPulse) -> usize {
        Arc::strong_count(pulse)
    }

    pub fn header(&self) -> &PulseHeader {
        &self.header
    }

    /// Mutable header access for metadata. Geometry and encoding fields are
    /// rewritten from the sample store whenever samples change.
    pub fn header_mut(&mut self) -> &mut PulseHeader {
        &mut self.header
    }

    pub fn codec(&self) -> &CodecContext {
        &self.codec
    }

    pub fn set_invert_hv_flag(&mut self, invert: bool) {
        self.invert_hv_flag = invert;
    }

    pub fn set_time(&mut self, secs: i64, nanos: i32) {
        self.header.time_secs = secs;
        self.header.time_nanos = nanos;
    }

    pub fn set_seq_num(&mut self, seq_num: i64) {
        self.header.pulse_seq_num = seq_num;
    }

    pub fn seq_num(&self) -> i64 {
        self.header.pulse_seq_num
    }

    pub fn ftime(&self) -> f64 {
        self.header.ftime()
    }

    pub fn n_gates(&self) -> usize {
        self.header.n_gates
    }

    pub fn n_gates_burst(&self) -> usize {
        self.header.n_gates_burst
    }

    pub fn n_channels(&self) -> usize {
        self.header.n_channels
    }

    pub fn prt(&self) -> f64 {
        self.header.prt as f64
    }

    pub fn prf(&self) -> f64 {
        if self.header.prt > 0.0 {
            1.0 / self.header.prt as f64
        } else {
            MISSING_DOUBLE
        }
    }

    /// Elevation folded into (-180, 180].
    pub fn el(&self) -> f64 {
        fold_elevation(self.header.elevation_deg as f64)
    }

    /// Azimuth folded into [0, 360).
    pub fn az(&self) -> f64 {
        fold_azimuth(self.header.azimuth_deg as f64)
    }

    pub fn fixed_el(&self) -> f64 {
        fold_elevation(self.header.fixed_el_deg as f64)
    }

    pub fn fixed_az(&self) -> f64 {
        fold_azimuth(self.header.fixed_az_deg as f64)
    }

    /// Fixed azimuth for RHI-style scans, fixed elevation otherwise.
    pub fn fixed_angle(&self) -> f64 {
        if self.header.scan_mode.fixes_azimuth() {
            self.fixed_az()
        } else {
            self.fixed_el()
        }
    }

    pub fn antenna_transition(&self) -> bool {
        self.header.antenna_transition
    }

    pub fn is_horiz(&self) -> bool {
        (self.header.hv_flag != 0) != self.invert_hv_flag
    }

    /// Burst phase change from the previous pulse, degrees.
    pub fn phase_diff0(&self) -> f64 {
        self.header.burst_arg_diff[0] as f64
    }

    /// Exchange `prt` and `prt_next`, for sources using the opposite
    /// staggered-PRT convention.
    pub fn swap_prt_values(&mut self) {
        std::mem::swap(&mut self.header.prt, &mut self.header.prt_next);
    }

    pub fn is_float(&self) -> bool {
        matches!(self.iq, IqStore::Float(_))
    }

    /// Encoding of the samples as currently held.
    pub fn stored_encoding(&self) -> IqEncoding {
        match &self.iq {
            IqStore::Float(_) => IqEncoding::Fl32,
            IqStore::Packed { encoding, .. } => *encoding,
        }
    }

    pub fn set_iq_floats(&mut self, n_gates: usize, n_channels: usize, iq: &[f32]) -> IwrfResult<()> {
        check_geometry(n_gates, n_channels, iq.len())?;
        self.header.n_gates = n_gates;
        self.header.n_gates_burst = 0;
        self.header.n_channels = n_channels;
        self.iq = IqStore::Float(codec::to_channels(iq, n_channels, n_gates));
        self.sync_header()
    }

    /// Set decoded samples directly from a `[channel, gate]` array.
    pub fn set_iq_channels(&mut self, iq: Array2<Complex32>) -> IwrfResult<()> {
        let (n_channels, n_gates) = iq.dim();
        check_geometry(n_gates, n_channels, n_channels * n_gates * 2)?;
        self.header.n_gates = n_gates;
        self.header.n_gates_burst = 0;
        self.header.n_channels = n_channels;
        self.iq = IqStore::Float(iq);
        self.sync_header()
    }

    pub fn set_iq_from_scaled_si32(
        &mut self,
        n_gates: usize,
        n_channels: usize,
        raw: &[i32],
        scale: f32,
        offset: f32,
    ) -> IwrfResult<()> {
        check_geometry(n_gates, n_channels, raw.len())?;
        let flat: Vec<f32> = raw
            .iter()
            .map(|&code| (code as f64 * scale as f64 + offset as f64) as f32)
            .collect();
        self.set_iq_floats(n_gates, n_channels, &flat)
    }

    pub fn set_iq_packed(
        &mut self,
        n_gates: usize,
        n_channels: usize,
        encoding: IqEncoding,
        codes: &[i16],
        scale: f32,
        offset: f32,
    ) -> IwrfResult<()> {
        if !encoding.is_packed16() {
            return Err(IwrfError::Configuration(format!(
                "{:?} is not a 16-bit packed encoding",
                encoding
            )));
        }
        check_geometry(n_gates, n_channels, codes.len())?;
        self.header.n_gates = n_gates;
        self.header.n_gates_burst = 0;
        self.header.n_channels = n_channels;
        self.iq = IqStore::Packed {
            encoding,
            codes: codes[..n_channels * n_gates * 2].to_vec(),
            scale,
            offset,
        };
        self.sync_header()
    }

    /// Decode packed samples to floats. Does nothing if already float.
    pub fn convert_to_fl32(&mut self) -> IwrfResult<()> {
        if self.is_float() {
            return Ok(());
        }
        let flat = self.flat_values();
        self.iq = IqStore::Float(codec::to_channels(
            &flat,
            self.header.n_channels,
            self.header.n_gates_total(),
        ));
        self.sync_header()
    }

    /// Pack the samples into a 16-bit encoding, choosing scale and offset
    /// from the data. `Fl32` converts back to floats.
    pub fn convert_to_packed(&mut self, encoding: IqEncoding) -> IwrfResult<()> {
        if encoding == IqEncoding::Fl32 {
            return self.convert_to_fl32();
        }
        if !encoding.is_packed16() {
            return Err(IwrfError::Configuration(format!(
                "cannot pack samples as {:?}",
                encoding
            )));
        }
        if self.stored_encoding() == encoding {
            return Ok(());
        }

        let flat = self.flat_values();

        self.iq = match encoding {
            IqEncoding::ScaledSi16 => {
                let scale = codec::auto_scale_si16(&flat);
                IqStore::Packed {
                    encoding,
                    codes: codec::encode_scaled_si16(&flat, scale, 0.0)?,
                    scale,
                    offset: 0.0,
                }
            }
            IqEncoding::DbmPhaseSi16 => {
                let (codes, scale, offset) = codec::pack_dbm_phase(&flat);
                IqStore::Packed {
                    encoding,
                    codes,
                    scale,
                    offset,
                }
            }
            _ => IqStore::Packed {
                encoding,
                codes: codec::encode_sigmet_fl16(&flat, &self.codec),
                scale: 1.0,
                offset: 0.0,
            },
        };
        self.sync_header()
    }

    /// IQ at a data gate (burst gates excluded). `None` when the channel or
    /// gate is outside this pulse's geometry.
    pub fn get_iq(&self, channel: usize, gate: usize) -> Option<Complex32> {
        if channel >= self.header.n_channels || gate >= self.header.n_gates {
            return None;
        }
        let column = self.header.n_gates_burst + gate;
        match &self.iq {
            IqStore::Float(iq) => iq.get([channel, column]).copied(),
            IqStore::Packed {
                encoding,
                codes,
                scale,
                offset,
            } => {
                let index = (channel * self.header.n_gates_total() + column) * 2;
                let pair = codes.get(index..index + 2)?;
                let value = match encoding {
                    IqEncoding::DbmPhaseSi16 => {
                        let flat = codec::unpack_dbm_phase(pair, *scale, *offset);
                        Complex32::new(flat[0], flat[1])
                    }
                    IqEncoding::SigmetFl16 => Complex32::new(
                        self.codec.sigmet_value(pair[0] as u16),
                        self.codec.sigmet_value(pair[1] as u16),
                    ),
                    _ => Complex32::new(
                        pair[0] as f32 * scale + offset,
                        pair[1] as f32 * scale + offset,
                    ),
                };
                Some(value)
            }
        }
    }

    /// Decoded data gates for one channel. `None` if the samples are still
    /// packed or the channel does not exist.
    pub fn channel_iq(&self, channel: usize) -> Option<ArrayView1<'_, Complex32>> {
        match &self.iq {
            IqStore::Float(iq) if channel < self.header.n_channels => {
                Some(iq.slice(s![channel, self.header.n_gates_burst..]))
            }
            _ => None,
        }
    }

    /// Decoded burst gates for one channel.
    pub fn burst_iq(&self, channel: usize) -> Option<ArrayView1<'_, Complex32>> {
        match &self.iq {
            IqStore::Float(iq) if channel < self.header.n_channels => {
                Some(iq.slice(s![channel, ..self.header.n_gates_burst]))
            }
            _ => None,
        }
    }

    /// Exchange I and Q in every sample.
    pub fn swap_iq(&mut self) {
        match &mut self.iq {
            IqStore::Float(iq) => iq.mapv_inplace(|v| Complex32::new(v.im, v.re)),
            IqStore::Packed { codes, .. } => {
                for pair in codes.chunks_exact_mut(2) {
                    pair.swap(0, 1);
                }
            }
        }
    }

    /// Negate Q in every sample.
    pub fn invert_q(&mut self) {
        match &mut self.iq {
            IqStore::Float(iq) => iq.mapv_inplace(|v| v.conj()),
            IqStore::Packed { codes, .. } => {
                for pair in codes.chunks_exact_mut(2) {
                    pair[1] = pair[1].saturating_neg();
                }
            }
        }
    }

    /// Subtract the burst phase from the phase of every sample, channel by
    /// channel. The burst phase comes from the last burst gate when the pulse
    /// carries burst gates, otherwise from the header's `burst_arg`.
    pub fn cohere_iq_to_burst_phase(&mut self) -> IwrfResult<()> {
        self.convert_to_fl32()?;
        let n_burst = self.header.n_gates_burst;
        let burst_args = self.header.burst_arg;
        if let IqStore::Float(iq) = &mut self.iq {
            for (chan, mut row) in iq.outer_iter_mut().enumerate() {
                let burst_arg = if n_burst > 0 {
                    row[n_burst - 1].arg()
                } else {
                    burst_args[chan].to_radians()
                };
                let rotation = Complex32::from_polar(1.0, burst_arg).conj();
                row.mapv_inplace(|v| v * rotation);
            }
        }
        self.header.phase_cohered = true;
        Ok(())
    }

    /// Cumulative burst phase differences for each trip hypothesis.
    ///
    /// `history` holds the preceding pulses, most recent first. Trip 1 is
    /// always 0 degrees; trip `n` adds the phase change of the `n-1` more
    /// recent pulses. Trips beyond the available history repeat the last
    /// known value.
    pub fn compute_phase_diffs(&mut self, history: &[SharedPulse], max_trips: usize) {
        let max_trips = max_trips.min(MAX_TRIPS);
        let queue_len = history.len() + 1;
        let mut diffs: Vec<f64> = Vec::with_capacity(max_trips);

        for trip in 0..max_trips {
            let value = match trip {
                0 => 0.0,
                t if t <= queue_len => {
                    let step = if t == 1 {
                        self.phase_diff0()
                    } else {
                        history[t - 2].phase_diff0()
                    };
                    wrap_degrees(diffs[t - 1] + step)
                }
                t => diffs[t - 1],
            };
            diffs.push(value);
        }

        self.burst_phases = diffs
            .iter()
            .map(|deg| Complex64::from_polar(1.0, deg.to_radians()))
            .collect();
        self.phase_diffs = diffs;
    }

    pub fn phase_diffs(&self) -> &[f64] {
        &self.phase_diffs
    }

    /// Unit phasors for each trip, matching [`Pulse::phase_diffs`].
    pub fn burst_phases(&self) -> &[Complex64] {
        &self.burst_phases
    }

    /// Serialise header and samples, in their current representation, to a
    /// little-endian pulse packet.
    pub fn assemble(&self) -> IwrfResult<Vec<u8>> {
        let mut buf = self.header.encode()?;
        match &self.iq {
            IqStore::Float(iq) => buf.extend(codec::write_f32_le(&codec::from_channels(iq))),
            IqStore::Packed { codes, .. } => buf.extend(codec::write_i16_le(codes)),
        }
        Ok(buf)
    }

    /// Interleaved float samples, decoding packed codes if needed. Packed
    /// samples that decode to exactly zero are raised to a tiny floor so
    /// later power logs stay finite.
    fn flat_values(&self) -> Vec<f32> {
        match &self.iq {
            IqStore::Float(iq) => codec::from_channels(iq),
            IqStore::Packed {
                encoding,
                codes,
                scale,
                offset,
            } => {
                let mut flat = match encoding {
                    IqEncoding::DbmPhaseSi16 => codec::unpack_dbm_phase(codes, *scale, *offset),
                    IqEncoding::SigmetFl16 => codec::unpack_sigmet(codes, &self.codec),
                    _ => codec::unscale_si16(codes, *scale, *offset),
                };
                for value in flat.iter_mut() {
                    if *value == 0.0 {
                        *value = ZERO_POWER_FLOOR;
                    }
                }
                flat
            }
        }
    }

    /// Bring encoding, scale, data length and offsets in the header in line
    /// with the sample store.
    fn sync_header(&mut self) -> IwrfResult<()> {
        match &self.iq {
            IqStore::Float(_) => {
                self.header.iq_encoding = IqEncoding::Fl32;
                self.header.scale = 1.0;
                self.header.offset = 0.0;
            }
            IqStore::Packed {
                encoding,
                scale,
                offset,
                ..
            } => {
                self.header.iq_encoding = *encoding;
                self.header.scale = *scale;
                self.header.offset = *offset;
            }
        }
        self.header.n_data = self.header.n_data_min();
        self.header.set_iq_offsets()?;
        self.header.set_len_bytes()
    }
}

fn check_geometry(n_gates: usize, n_channels: usize, n_values: usize) -> IwrfResult<()> {
    if n_channels == 0 || n_channels > crate::iwrf::MAX_CHAN {
        return Err(IwrfError::Configuration(format!(
            "n_channels {} outside 1..={}",
            n_channels,
            crate::iwrf::MAX_CHAN
        )));
    }
    let needed = n_gates * n_channels * 2;
    if n_values < needed {
        return Err(IwrfError::Range(format!(
            "{} gates x {} channels needs {} values, have {}",
            n_gates, n_channels, needed, n_values
        )));
    }
    Ok(())
}

fn wrap_degrees(mut deg: f64) -> f64 {
    while deg > 360.0 {
        deg -= 360.0;
    }
    while deg < 0.0 {
        deg += 360.0;
    }
    deg
}

/// Surveillance scans pointing near the zenith are vertical pointing.
fn relabel_vertical_scan(header: &mut PulseHeader) {
    if header.scan_mode == ScanMode::AzSur360
        && header.elevation_deg > 85.0
        && header.elevation_deg < 95.0
    {
        header.scan_mode = ScanMode::VerticalPointing;
    }
}

fn fold_elevation(deg: f64) -> f64 {
    if deg.is_nan() || deg <= 180.0 {
        deg
    } else {
        deg - 360.0
    }
}

fn fold_azimuth(deg: f64) -> f64 {
    if deg.is_nan() || deg >= 0.0 {
        deg
    } else {
        deg + 360.0
    }
}
