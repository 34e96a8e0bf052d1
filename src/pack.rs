//! Packed int8 weight layouts.
//!
//! Both layouts are pure functions of the canonical `(oc, ic, kh, kw)` tensor:
//!
//! * software: word `[g][ic][y][x]` holds channels `4g..4g+4`, one per byte lane,
//!   lane `b` in bits `8b..8b+8`;
//! * hardware: for one 32-channel PE block, every `(ic, y, x)` position emits
//!   [`NUM_CLUSTERS`] words, word `c` carrying channels `block*32 + 4c ..+4`.
//!
//! Lanes past the real output-channel count are always zero.

use alloc::vec;
use alloc::vec::Vec;

use crate::{
    err::QconvResult,
    fixed::bias_to_fixed,
    registers::consts::{NUM_CLUSTERS, NUM_PE},
    tensor::{WeightShape, check_len},
};

/// Four int8 lanes packed little-lane-first.
#[inline(always)]
pub const fn pack4(lanes: [i8; 4]) -> u32 {
    (lanes[0] as u8 as u32)
        | (lanes[1] as u8 as u32) << 8
        | (lanes[2] as u8 as u32) << 16
        | (lanes[3] as u8 as u32) << 24
}

/// The four lanes of a packed word, sign-extended.
#[inline(always)]
pub const fn unpack4(word: u32) -> [i32; 4] {
    [
        word as u8 as i8 as i32,
        (word >> 8) as u8 as i8 as i32,
        (word >> 16) as u8 as i8 as i32,
        (word >> 24) as u8 as i8 as i32,
    ]
}

/// A software-layout weight buffer together with the tensor shape it encodes.
#[derive(Debug, Clone, Copy)]
pub struct PackedWeights<'a> {
    words: &'a [u32],
    shape: WeightShape,
}

impl<'a> PackedWeights<'a> {
    pub fn new(words: &'a [u32], shape: WeightShape) -> QconvResult<Self> {
        check_len(shape.software_words(), words.len())?;
        Ok(Self { words, shape })
    }

    pub fn shape(&self) -> WeightShape {
        self.shape
    }

    pub fn words(&self) -> &'a [u32] {
        self.words
    }

    /// Word of channel group `g` at tap `(ic, y, x)`.
    #[inline(always)]
    pub fn word(&self, g: usize, ic: usize, y: usize, x: usize) -> u32 {
        let s = &self.shape;
        self.words[((g * s.in_channels + ic) * s.kernel_h + y) * s.kernel_w + x]
    }
}

fn lane(weights: &[i8], shape: &WeightShape, oc: usize, tap: usize) -> i8 {
    if oc < shape.out_channels {
        weights[oc * shape.taps_per_channel() + tap]
    } else {
        0
    }
}

pub fn pack_software(weights: &[i8], shape: WeightShape) -> QconvResult<Vec<u32>> {
    let mut out = vec![0u32; shape.software_words()];
    pack_software_into(weights, shape, &mut out)?;
    Ok(out)
}

/// Software layout into a caller buffer of exactly `shape.software_words()` words.
pub fn pack_software_into(weights: &[i8], shape: WeightShape, out: &mut [u32]) -> QconvResult<()> {
    check_len(shape.len(), weights.len())?;
    check_len(shape.software_words(), out.len())?;
    let taps = shape.taps_per_channel();
    for g in 0..shape.channel_groups() {
        for tap in 0..taps {
            let oc = g * 4;
            out[g * taps + tap] = pack4([
                lane(weights, &shape, oc, tap),
                lane(weights, &shape, oc + 1, tap),
                lane(weights, &shape, oc + 2, tap),
                lane(weights, &shape, oc + 3, tap),
            ]);
        }
    }
    Ok(())
}

/// Inverse of [`pack_software_into`]; padding lanes are dropped.
pub fn unpack_software(packed: &PackedWeights<'_>, out: &mut [i8]) -> QconvResult<()> {
    let shape = packed.shape();
    check_len(shape.len(), out.len())?;
    let taps = shape.taps_per_channel();
    for oc in 0..shape.out_channels {
        let (g, b) = (oc / 4, oc % 4);
        for tap in 0..taps {
            out[oc * taps + tap] = unpack4(packed.words[g * taps + tap])[b] as i8;
        }
    }
    Ok(())
}

/// Hardware layout of PE block `block` into `out` (`shape.hardware_words()` words).
pub fn pack_hardware(
    weights: &[i8],
    shape: WeightShape,
    block: usize,
    out: &mut [u32],
) -> QconvResult<()> {
    check_len(shape.len(), weights.len())?;
    check_len(shape.hardware_words(), out.len())?;
    let oc0 = block * NUM_PE;
    let words = out.chunks_exact_mut(NUM_CLUSTERS);
    for (tap, cluster_words) in words.enumerate() {
        for (c, word) in cluster_words.iter_mut().enumerate() {
            let oc = oc0 + c * 4;
            *word = pack4([
                lane(weights, &shape, oc, tap),
                lane(weights, &shape, oc + 1, tap),
                lane(weights, &shape, oc + 2, tap),
                lane(weights, &shape, oc + 3, tap),
            ]);
        }
    }
    Ok(())
}

/// Fixed-point bias of PE block `block`, zero past `out_channels`.
pub fn quantize_bias_block(
    bias: Option<&[f32]>,
    scale: f32,
    out_channels: usize,
    block: usize,
) -> [i32; NUM_PE] {
    let mut out = [0i32; NUM_PE];
    if let Some(bias) = bias {
        for (i, slot) in out.iter_mut().enumerate() {
            let oc = block * NUM_PE + i;
            if oc < out_channels && oc < bias.len() {
                *slot = bias_to_fixed(Some(bias[oc]), scale);
            }
        }
    }
    out
}

/// Same as [`quantize_bias_block`] for a bias already in the accumulator domain.
pub fn fixed_bias_block(bias: Option<&[i32]>, out_channels: usize, block: usize) -> [i32; NUM_PE] {
    let mut out = [0i32; NUM_PE];
    if let Some(bias) = bias {
        let oc0 = block * NUM_PE;
        let end = out_channels.min(bias.len()).min(oc0 + NUM_PE);
        if end > oc0 {
            out[..end - oc0].copy_from_slice(&bias[oc0..end]);
        }
    }
    out
}
