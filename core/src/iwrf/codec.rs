use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use ndarray::Array2;
use num_complex::Complex32;

use crate::iwrf::header::WireOrder;
use crate::iwrf::sigmet::SigmetVariant;
use crate::prelude::{IwrfError, IwrfResult};

/// Degrees per count of the phase half of a DBM_PHASE_SI16 pair.
pub const PHASE_MULT: f64 = 180.0 / 32767.0;

/// Largest magnitude of a packed signed 16-bit code.
pub const SI16_MAX_CODE: i32 = 32767;

/// Floor applied to decoded samples that come out exactly zero.
pub const ZERO_POWER_FLOOR: f32 = 1.0e-20;

/// Decode-time settings shared by every pulse in a stream.
///
/// Built once before the stream is read: choosing the SIGMET table
/// variant here forces the table to exist before any decode runs.
#[derive(Clone, Copy)]
pub struct CodecContext {
    variant: SigmetVariant,
    saturation_mult: f32,
    lut: &'static [f32],
}

impl CodecContext {
    pub fn new(variant: SigmetVariant, saturation_mult: f32) -> Self {
        Self {
            variant,
            saturation_mult,
            lut: variant.lut(),
        }
    }

    pub fn variant(&self) -> SigmetVariant {
        self.variant
    }

    /// Multiplier applied to SIGMET values to recover receiver amplitude.
    pub fn saturation_mult(&self) -> f32 {
        self.saturation_mult
    }

    pub fn sigmet_lut(&self) -> &'static [f32] {
        self.lut
    }

    pub fn sigmet_value(&self, code: u16) -> f32 {
        self.lut[code as usize] * self.saturation_mult
    }
}

impl Default for CodecContext {
    fn default() -> Self {
        Self::new(SigmetVariant::Standard, 1.0)
    }
}

impl fmt::Debug for CodecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecContext")
            .field("variant", &self.variant)
            .field("saturation_mult", &self.saturation_mult)
            .finish()
    }
}

fn payload_slice<'a>(
    payload: &'a [u8],
    n_values: usize,
    width: usize,
    what: &str,
) -> IwrfResult<&'a [u8]> {
    let needed = n_values
        .checked_mul(width)
        .ok_or_else(|| IwrfError::Range(format!("{} payload size overflows", what)))?;
    if payload.len() < needed {
        return Err(IwrfError::Range(format!(
            "{} payload needs {} bytes for {} values, have {}",
            what,
            needed,
            n_values,
            payload.len()
        )));
    }
    Ok(&payload[..needed])
}

pub fn decode_fl32(payload: &[u8], order: WireOrder, n_values: usize) -> IwrfResult<Vec<f32>> {
    let bytes = payload_slice(payload, n_values, 4, "FL32")?;
    let mut out = vec![0f32; n_values];
    match order {
        WireOrder::Little => LittleEndian::read_f32_into(bytes, &mut out),
        WireOrder::Big => BigEndian::read_f32_into(bytes, &mut out),
    }
    Ok(out)
}

pub fn read_si16(payload: &[u8], order: WireOrder, n_values: usize) -> IwrfResult<Vec<i16>> {
    let bytes = payload_slice(payload, n_values, 2, "SI16")?;
    let mut out = vec![0i16; n_values];
    match order {
        WireOrder::Little => LittleEndian::read_i16_into(bytes, &mut out),
        WireOrder::Big => BigEndian::read_i16_into(bytes, &mut out),
    }
    Ok(out)
}

pub fn read_si32(payload: &[u8], order: WireOrder, n_values: usize) -> IwrfResult<Vec<i32>> {
    let bytes = payload_slice(payload, n_values, 4, "SI32")?;
    let mut out = vec![0i32; n_values];
    match order {
        WireOrder::Little => LittleEndian::read_i32_into(bytes, &mut out),
        WireOrder::Big => BigEndian::read_i32_into(bytes, &mut out),
    }
    Ok(out)
}

/// `value = raw * scale + offset` for each signed 16-bit sample.
pub fn decode_scaled_si16(
    payload: &[u8],
    order: WireOrder,
    n_values: usize,
    scale: f32,
    offset: f32,
) -> IwrfResult<Vec<f32>> {
    let raw = read_si16(payload, order, n_values)?;
    Ok(unscale_si16(&raw, scale, offset))
}

pub fn unscale_si16(raw: &[i16], scale: f32, offset: f32) -> Vec<f32> {
    raw.iter()
        .map(|&code| code as f32 * scale + offset)
        .collect()
}

pub fn decode_scaled_si32(
    payload: &[u8],
    order: WireOrder,
    n_values: usize,
    scale: f32,
    offset: f32,
) -> IwrfResult<Vec<f32>> {
    let raw = read_si32(payload, order, n_values)?;
    Ok(raw
        .iter()
        .map(|&code| (code as f64 * scale as f64 + offset as f64) as f32)
        .collect())
}

pub fn decode_sigmet_fl16(
    payload: &[u8],
    order: WireOrder,
    n_values: usize,
    ctx: &CodecContext,
) -> IwrfResult<Vec<f32>> {
    let raw = read_si16(payload, order, n_values)?;
    Ok(unpack_sigmet(&raw, ctx))
}

pub fn unpack_sigmet(raw: &[i16], ctx: &CodecContext) -> Vec<f32> {
    raw.iter()
        .map(|&code| ctx.sigmet_value(code as u16))
        .collect()
}

/// Quantise floats to signed 16-bit codes, saturating at +/-32767.
pub fn encode_scaled_si16(values: &[f32], scale: f32, offset: f32) -> IwrfResult<Vec<i16>> {
    if !(scale > 0.0) || !scale.is_finite() {
        return Err(IwrfError::Configuration(format!(
            "SI16 scale must be positive, got {}",
            scale
        )));
    }
    let scale = scale as f64;
    let offset = offset as f64;
    Ok(values
        .iter()
        .map(|&value| {
            let code = ((value as f64 - offset) / scale + 0.5).floor();
            code.clamp(-(SI16_MAX_CODE as f64), SI16_MAX_CODE as f64) as i16
        })
        .collect())
}

/// Scale that maps the largest magnitude in `values` to full scale.
pub fn auto_scale_si16(values: &[f32]) -> f32 {
    let max_abs = values.iter().fold(0f32, |acc, v| acc.max(v.abs()));
    if max_abs > 0.0 {
        max_abs / SI16_MAX_CODE as f32
    } else {
        1.0
    }
}

pub fn encode_sigmet_fl16(values: &[f32], ctx: &CodecContext) -> Vec<i16> {
    values
        .iter()
        .map(|&value| ctx.variant().encode_value(value / ctx.saturation_mult()) as i16)
        .collect()
}

/// Convert (power dBm, phase) code pairs into I/Q floats.
pub fn unpack_dbm_phase(raw: &[i16], scale: f32, offset: f32) -> Vec<f32> {
    let mut out = Vec::with_capacity(raw.len());
    for pair in raw.chunks_exact(2) {
        let power_dbm = pair[0] as f64 * scale as f64 + offset as f64;
        let power = 10f64.powf(power_dbm / 10.0);
        let phase = (pair[1] as f64 * PHASE_MULT).to_radians();
        let mut mag = power.sqrt();
        if mag == 0.0 {
            mag = ZERO_POWER_FLOOR as f64;
        }
        out.push((mag * phase.cos()) as f32);
        out.push((mag * phase.sin()) as f32);
    }
    out
}

/// Pack I/Q floats as (power dBm, phase) codes. Returns the codes with the
/// power scale and offset chosen to span the observed dynamic range.
pub fn pack_dbm_phase(values: &[f32]) -> (Vec<i16>, f32, f32) {
    let pairs: Vec<(f64, f64)> = values
        .chunks_exact(2)
        .map(|pair| {
            let (i, q) = (pair[0] as f64, pair[1] as f64);
            let power = (i * i + q * q).max(1.0e-40);
            let phase_deg = if i != 0.0 || q != 0.0 {
                q.atan2(i).to_degrees()
            } else {
                0.0
            };
            (10.0 * power.log10(), phase_deg)
        })
        .collect();

    let min_db = pairs.iter().fold(f64::MAX, |acc, p| acc.min(p.0));
    let max_db = pairs.iter().fold(f64::MIN, |acc, p| acc.max(p.0));
    let range = max_db - min_db;
    let scale = if range > 0.0 { range / 65535.0 } else { 1.0 };
    let offset = if pairs.is_empty() { 0.0 } else { (max_db + min_db) / 2.0 };

    let limit = SI16_MAX_CODE as f64;
    let mut codes = Vec::with_capacity(values.len());
    for (power_db, phase_deg) in pairs {
        let power_code = ((power_db - offset) / scale + 0.5).floor().clamp(-limit, limit);
        let phase_code = (phase_deg / PHASE_MULT + 0.5).floor().clamp(-limit, limit);
        codes.push(power_code as i16);
        codes.push(phase_code as i16);
    }
    (codes, scale as f32, offset as f32)
}

pub fn write_f32_le(values: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * 4];
    LittleEndian::write_f32_into(values, &mut out);
    out
}

pub fn write_i16_le(values: &[i16]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * 2];
    LittleEndian::write_i16_into(values, &mut out);
    out
}

/// Arrange interleaved I,Q floats into a channel-by-gate complex array.
pub fn to_channels(flat: &[f32], n_channels: usize, n_gates_total: usize) -> Array2<Complex32> {
    let mut iq = Array2::from_elem((n_channels, n_gates_total), Complex32::new(0.0, 0.0));
    for ((chan, gate), value) in iq.indexed_iter_mut() {
        let index = (chan * n_gates_total + gate) * 2;
        if index + 1 < flat.len() {
            *value = Complex32::new(flat[index], flat[index + 1]);
        }
    }
    iq
}

/// Inverse of [`to_channels`].
pub fn from_channels(iq: &Array2<Complex32>) -> Vec<f32> {
    let mut flat = Vec::with_capacity(iq.len() * 2);
    for value in iq.iter() {
        flat.push(value.re);
        flat.push(value.im);
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn fl32_decodes_both_byte_orders() {
        let values = [1.5f32, -2.25, 0.0, 1.0e-3];
        let le = write_f32_le(&values);
        assert_eq!(decode_fl32(&le, WireOrder::Little, 4).unwrap(), values);

        let mut be = vec![0u8; 16];
        BigEndian::write_f32_into(&values, &mut be);
        assert_eq!(decode_fl32(&be, WireOrder::Big, 4).unwrap(), values);
    }

    #[test]
    fn short_payload_is_range_error() {
        let payload = vec![0u8; 10];
        let err = decode_scaled_si16(&payload, WireOrder::Little, 6, 1.0, 0.0).unwrap_err();
        assert!(matches!(err, IwrfError::Range(_)));
    }

    #[test]
    fn scaled_si16_round_trip_within_half_step() {
        let scale = 0.001f32;
        let offset = 0.25f32;
        let values: Vec<f32> = (0..200).map(|k| ((k as f32) * 0.37).sin() * 20.0 + 0.25).collect();
        let codes = encode_scaled_si16(&values, scale, offset).unwrap();
        let payload = write_i16_le(&codes);
        let decoded =
            decode_scaled_si16(&payload, WireOrder::Little, values.len(), scale, offset).unwrap();
        for (orig, back) in values.iter().zip(decoded.iter()) {
            assert!((orig - back).abs() <= scale / 2.0 + 1.0e-5, "{} vs {}", orig, back);
        }
    }

    #[test]
    fn scaled_si16_saturates() {
        let codes = encode_scaled_si16(&[1.0e9, -1.0e9, 0.0], 1.0, 0.0).unwrap();
        assert_eq!(codes, vec![32767, -32767, 0]);
        assert!(encode_scaled_si16(&[1.0], 0.0, 0.0).is_err());
    }

    #[test]
    fn auto_scale_maps_peak_to_full_scale() {
        let values = [0.5f32, -2.0, 1.0];
        let scale = auto_scale_si16(&values);
        let codes = encode_scaled_si16(&values, scale, 0.0).unwrap();
        assert_eq!(codes[1], -32767);
        assert_eq!(auto_scale_si16(&[0.0, 0.0]), 1.0);
    }

    #[test]
    fn scaled_si32_applies_scale_and_offset() {
        let raw = [100i32, -200];
        let mut payload = vec![0u8; 8];
        LittleEndian::write_i32_into(&raw, &mut payload);
        let decoded = decode_scaled_si32(&payload, WireOrder::Little, 2, 0.5, 1.0).unwrap();
        assert_eq!(decoded, vec![51.0, -99.0]);
    }

    #[test]
    fn sigmet_decode_matches_lookup_table() {
        let ctx = CodecContext::default();
        let codes: Vec<i16> = [0u16, 0x0123, 0x0FFF, 0xE000, 0xD800, 0xF7FF]
            .iter()
            .map(|&c| c as i16)
            .collect();
        let payload = write_i16_le(&codes);
        let decoded = decode_sigmet_fl16(&payload, WireOrder::Little, codes.len(), &ctx).unwrap();
        for (code, value) in codes.iter().zip(decoded.iter()) {
            assert_eq!(value.to_bits(), ctx.sigmet_lut()[*code as u16 as usize].to_bits());
        }
    }

    #[test]
    fn sigmet_encode_honours_saturation_mult() {
        let ctx = CodecContext::new(SigmetVariant::Standard, 2.0);
        let codes = encode_sigmet_fl16(&[1.0, -0.5], &ctx);
        let back = unpack_sigmet(&codes, &ctx);
        assert_approx_eq!(back[0], 1.0, 1.0e-3);
        assert_approx_eq!(back[1], -0.5, 1.0e-3);
    }

    #[test]
    fn dbm_phase_round_trip_preserves_power_and_phase() {
        let values = [1.0f32, 0.0, 0.0, 0.5, -0.1, -0.1, 0.03, -0.2];
        let (codes, scale, offset) = pack_dbm_phase(&values);
        let back = unpack_dbm_phase(&codes, scale, offset);
        for (pair, back_pair) in values.chunks(2).zip(back.chunks(2)) {
            let p0 = pair[0] * pair[0] + pair[1] * pair[1];
            let p1 = back_pair[0] * back_pair[0] + back_pair[1] * back_pair[1];
            assert_approx_eq!(10.0 * p0.log10(), 10.0 * p1.log10(), 0.01);
            let a0 = pair[1].atan2(pair[0]);
            let a1 = back_pair[1].atan2(back_pair[0]);
            assert_approx_eq!(a0, a1, 1.0e-3);
        }
    }

    #[test]
    fn channel_layout_round_trips() {
        let flat: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let iq = to_channels(&flat, 2, 3);
        assert_eq!(iq[[1, 0]], Complex32::new(6.0, 7.0));
        assert_eq!(from_channels(&iq), flat);
    }
}
