//! SiLU (`x * sigmoid(x)`), the activation paired with every convolution.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::{
    err::QconvResult,
    fixed::{dequantize, quantize},
    tensor::check_len,
};

/// What follows a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    Identity,
    Silu,
}

/// Floating SiLU. Non-finite inputs map to `100.0` when positive, else `0.0`.
#[inline]
pub fn silu_f32(x: f32) -> f32 {
    if !x.is_finite() {
        return if x > 0.0 { 100.0 } else { 0.0 };
    }
    let s = 1.0 / (1.0 + libm::expf(-x));
    x * s
}

pub fn silu_f32_in_place(xs: &mut [f32]) {
    for v in xs {
        *v = silu_f32(*v);
    }
}

/// Q6.10 SiLU as a lookup over all 65536 input patterns.
pub struct SiluTable {
    lut: Box<[i16]>,
}

impl SiluTable {
    pub fn new() -> Self {
        let lut: Vec<i16> = (0..=u16::MAX)
            .map(|bits| quantize(silu_f32(dequantize(bits as i16))))
            .collect();
        Self {
            lut: lut.into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn get(&self, x: i16) -> i16 {
        self.lut[x as u16 as usize]
    }

    pub fn apply_in_place(&self, xs: &mut [i16]) {
        for v in xs {
            *v = self.get(*v);
        }
    }

    pub fn apply(&self, src: &[i16], dst: &mut [i16]) -> QconvResult<()> {
        check_len(src.len(), dst.len())?;
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = self.get(s);
        }
        Ok(())
    }
}

impl Default for SiluTable {
    fn default() -> Self {
        Self::new()
    }
}
