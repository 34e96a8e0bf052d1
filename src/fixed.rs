//! Q6.10 activation format and the integer requantization contract.
//!
//! Activations are `i16` holding `value * 1024`. Weights stay in int8 units, so a
//! dot product of a Q6.10 activation with int8 weights is `1024 / scale` times the
//! real-valued result. The per-layer [`multiplier`] (Q16.16 encoding of the weight
//! scale) brings the 32-bit accumulator back into Q6.10 through [`requantize`].

use crate::err::{QconvError, QconvResult};

/// Fractional bits of the activation format.
pub const FRAC_BITS: u32 = 10;
/// `1.0` in Q6.10.
pub const ONE: i32 = 1 << FRAC_BITS;
/// Fractional bits of the requantization multiplier.
pub const MULT_FRAC_BITS: u32 = 16;

const ROUND_HALF: i64 = 1 << (MULT_FRAC_BITS - 1);

/// Float to Q6.10, rounding to nearest and saturating.
#[inline]
pub fn quantize(x: f32) -> i16 {
    let v = libm::roundf(x * ONE as f32);
    // NaN casts to zero.
    v.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Q6.10 to float. Exact.
#[inline]
pub fn dequantize(x: i16) -> f32 {
    x as f32 / ONE as f32
}

/// Q16.16 multiplier for a weight scale.
///
/// Degenerate scales (zero, negative, NaN) yield `1`, and so does any positive scale
/// that would round to zero, so a layer never silently multiplies everything by zero.
pub fn multiplier(scale: f32) -> u32 {
    if !(scale > 0.0) {
        return 1;
    }
    let m = libm::roundf(scale * (1u32 << MULT_FRAC_BITS) as f32) as u32;
    m.max(1)
}

/// Rounding right shift of a 32-bit accumulator back into Q6.10, saturated.
#[inline(always)]
pub fn requantize(acc: i32, multiplier: u32) -> i16 {
    let v = (acc as i64 * multiplier as i64 + ROUND_HALF) >> MULT_FRAC_BITS;
    v.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

/// Moves a float bias into the accumulator domain (`bias * 1024 / scale`).
pub fn bias_to_fixed(bias: Option<f32>, scale: f32) -> i32 {
    match bias {
        Some(b) if scale > 0.0 => {
            let factor = ONE as f32 / scale;
            libm::roundf(b * factor) as i32
        }
        _ => 0,
    }
}

/// Converts a whole float tensor into Q6.10.
pub fn quantize_slice(src: &[f32], dst: &mut [i16]) -> QconvResult<()> {
    if src.len() != dst.len() {
        return Err(QconvError::ShapeMismatch {
            expected: src.len(),
            actual: dst.len(),
        });
    }
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = quantize(s);
    }
    Ok(())
}

/// Converts a whole Q6.10 tensor back into floats.
pub fn dequantize_slice(src: &[i16], dst: &mut [f32]) -> QconvResult<()> {
    if src.len() != dst.len() {
        return Err(QconvError::ShapeMismatch {
            expected: src.len(),
            actual: dst.len(),
        });
    }
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = dequantize(s);
    }
    Ok(())
}
