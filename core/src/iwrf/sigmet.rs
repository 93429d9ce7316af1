use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Number of distinct 16-bit codes, and so the lookup table length.
pub const SIGMET_LUT_LEN: usize = 65536;

/// Largest magnitude representable by the packed format.
pub const SIGMET_FULL_SCALE: f32 = 4.0;

/// SIGMET 16-bit packed float layout.
///
/// Values are normalised so a full-scale CW input has magnitude 1.0 with a
/// further factor of four of headroom. `Standard` uses a 4-bit exponent and
/// 12-bit signed mantissa with a denormal region below 2^-13. `Legacy` uses a
/// 5-bit exponent and 11-bit signed mantissa, with code 0 meaning zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SigmetVariant {
    #[default]
    Standard,
    Legacy,
}

lazy_static! {
    static ref STANDARD_LUT: Vec<f32> = build_lut(SigmetVariant::Standard);
    static ref LEGACY_LUT: Vec<f32> = build_lut(SigmetVariant::Legacy);
}

fn build_lut(variant: SigmetVariant) -> Vec<f32> {
    (0..SIGMET_LUT_LEN)
        .map(|code| variant.decode_code(code as u16))
        .collect()
}

impl SigmetVariant {
    /// Lookup table mapping every code to its float value.
    ///
    /// Built on first use; later calls share the same read-only table.
    pub fn lut(self) -> &'static [f32] {
        match self {
            SigmetVariant::Standard => STANDARD_LUT.as_slice(),
            SigmetVariant::Legacy => LEGACY_LUT.as_slice(),
        }
    }

    /// Decode one code without the table.
    pub fn decode_code(self, code: u16) -> f32 {
        match self {
            SigmetVariant::Standard => decode_standard(code),
            SigmetVariant::Legacy => decode_legacy(code),
        }
    }

    /// Encode one float, saturating outside the representable range.
    pub fn encode_value(self, value: f32) -> u16 {
        match self {
            SigmetVariant::Standard => encode_standard(value),
            SigmetVariant::Legacy => encode_legacy(value),
        }
    }

    pub fn decode_into(self, codes: &[u16], out: &mut [f32]) {
        let lut = self.lut();
        for (dst, code) in out.iter_mut().zip(codes) {
            *dst = lut[*code as usize];
        }
    }

    pub fn encode_into(self, values: &[f32], out: &mut [u16]) {
        for (dst, value) in out.iter_mut().zip(values) {
            *dst = self.encode_value(*value);
        }
    }
}

fn decode_standard(code: u16) -> f32 {
    if code & 0xF000 != 0 {
        let exp = ((code >> 12) & 0x000F) as u32;
        let mut man = (code & 0x07FF) as i32;
        if code & 0x0800 != 0 {
            man |= 0xFFFF_F000u32 as i32;
        } else {
            man |= 0x0000_0800;
        }
        ((man as f32 * (1u32 << exp) as f32) as f64 / 3.355443e7) as f32
    } else {
        // denormal: 12-bit signed value in the low bits
        ((((code as i32) << 20) as f32) as f64 / 1.759218e13) as f32
    }
}

fn decode_legacy(code: u16) -> f32 {
    if code == 0 {
        return 0.0;
    }
    let exp = ((code >> 11) & 0x001F) as u32;
    let mut man = (code & 0x03FF) as i32;
    if code & 0x0400 != 0 {
        man |= 0xFFFF_F800u32 as i32;
    } else {
        man |= 0x0000_0400;
    }
    ((man as f32 * (1u32 << exp) as f32) as f64 / 1.099511627e12) as f32
}

/// Split `value` into a mantissa in [0.5, 1) and a power of two.
fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 || !value.is_finite() {
        return (value, 0);
    }
    let mut exp = value.abs().log2().floor() as i32 + 1;
    let mut mant = value / 2f64.powi(exp);
    // log2 can land one off near exact powers of two
    if mant.abs() >= 1.0 {
        mant /= 2.0;
        exp += 1;
    } else if mant.abs() < 0.5 {
        mant *= 2.0;
        exp -= 1;
    }
    (mant, exp)
}

fn nint(value: f64) -> i32 {
    (value + 0.5).floor() as i32
}

fn encode_standard(value: f32) -> u16 {
    if value.is_nan() {
        return 0;
    }
    if value >= SIGMET_FULL_SCALE {
        return 0xF7FF;
    }
    if value <= -SIGMET_FULL_SCALE {
        return 0xF800;
    }
    if value > -1.221299e-4 && value < 1.220703e-4 {
        let underflow = nint(1.677721e7 * value as f64).clamp(-2048, 2047);
        return (underflow & 0x0FFF) as u16;
    }

    let (frac, exp) = frexp(value as f64);
    let mut man = nint(4096.0 * frac);
    let mut exp = exp + 13;
    let sign = (value < 0.0) as i32;
    if man == 4096 {
        exp += 1;
    }
    if man == -2048 {
        exp -= 1;
    }
    if exp > 15 {
        return if sign == 1 { 0xF800 } else { 0xF7FF };
    }
    man &= 0x07FF;
    ((exp << 12) | (sign << 11) | man) as u16
}

fn encode_legacy(value: f32) -> u16 {
    if value.is_nan() {
        return 0;
    }
    if value >= SIGMET_FULL_SCALE {
        return 0xFBFF;
    }
    if value <= -SIGMET_FULL_SCALE {
        return 0xFC00;
    }

    let (frac, exp) = frexp(value as f64);
    let mut man = nint(2048.0 * frac);
    let mut exp = exp + 29;
    let sign = (value < 0.0) as i32;
    if man == 2048 {
        exp += 1;
    }
    if man == -1024 {
        exp -= 1;
    }
    if exp < 0 || (exp == 0 && sign == 0 && man & 0x03FF == 0) {
        // below the smallest normal magnitude; code 0 is reserved for zero
        return 0;
    }
    if exp > 31 {
        return if sign == 1 { 0xFC00 } else { 0xFBFF };
    }
    man &= 0x03FF;
    ((exp << 11) | (sign << 10) | man) as u16
}
