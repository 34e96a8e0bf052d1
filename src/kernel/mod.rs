//! Tiled fixed-point convolution over the software weight layout.
//!
//! The output is walked in `TILE_H x TILE_W` spatial tiles times `OC_BLOCK`
//! output channels. Each tile accumulates into a stack-resident `i32` buffer
//! seeded with the bias, then requantizes once into Q6.10.
//!
//! Tiles whose receptive field lies entirely inside the input take a path without
//! per-tap bounds checks; the rest check every tap and read zero outside the
//! input. Both paths add the same products in the same order, so the split never
//! changes a result.

mod float;

pub use float::{FloatTaps, FloatWeights, Int8Weights, conv2d_f32};

use crate::{
    err::{QconvError, QconvResult},
    fixed::requantize,
    pack::{PackedWeights, unpack4},
    tensor::Conv2dGeometry,
};

pub const TILE_H: usize = 8;
pub const TILE_W: usize = 8;
pub const OC_BLOCK: usize = 32;

const TILE_PIXELS: usize = TILE_H * TILE_W;

type AccTile = [[i32; TILE_PIXELS]; OC_BLOCK];

/// How tiles are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TilePolicy {
    /// Interior tiles skip bounds checks, 1x1 layers use the pair-load path.
    #[default]
    Auto,
    /// Every tile takes the bounds-checked path.
    ForceBoundary,
}

/// Output rows (or columns) whose receptive field never leaves the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SafeSpan {
    min: usize,
    max: Option<usize>,
}

impl SafeSpan {
    pub(crate) fn new(input: usize, kernel: usize, stride: usize, pad: usize) -> Self {
        Self {
            min: pad.div_ceil(stride),
            max: (input + pad).checked_sub(kernel).map(|v| v / stride),
        }
    }

    /// Whether output positions `start..start + len` are all interior.
    pub(crate) fn covers(&self, start: usize, len: usize) -> bool {
        match self.max {
            Some(max) => start >= self.min && start + len - 1 <= max,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Tile {
    oc0: usize,
    oc_n: usize,
    oh0: usize,
    oh_n: usize,
    ow0: usize,
    ow_n: usize,
}

/// `y = requantize(conv(x, w) + bias, multiplier)` over NCHW Q6.10 tensors.
///
/// `bias` is in the accumulator domain (see [`crate::fixed::bias_to_fixed`]) and
/// must hold at least `out_channels` entries when present. Nothing is written
/// to `y` if any argument is rejected.
pub fn conv2d_q610(
    x: &[i16],
    w: &PackedWeights<'_>,
    bias: Option<&[i32]>,
    multiplier: u32,
    geom: &Conv2dGeometry,
    y: &mut [i16],
) -> QconvResult<()> {
    conv2d_q610_with(x, w, bias, multiplier, geom, y, TilePolicy::Auto)
}

pub fn conv2d_q610_with(
    x: &[i16],
    w: &PackedWeights<'_>,
    bias: Option<&[i32]>,
    multiplier: u32,
    geom: &Conv2dGeometry,
    y: &mut [i16],
    policy: TilePolicy,
) -> QconvResult<()> {
    geom.check_buffers(x.len(), y.len())?;
    if w.shape() != geom.weight_shape() {
        return Err(QconvError::ShapeMismatch {
            expected: geom.weight_shape().len(),
            actual: w.shape().len(),
        });
    }
    if let Some(b) = bias {
        if b.len() < geom.out_channels {
            return Err(QconvError::ShapeMismatch {
                expected: geom.out_channels,
                actual: b.len(),
            });
        }
    }

    let (oh, ow) = (geom.out_h(), geom.out_w());
    let safe_h = SafeSpan::new(geom.in_h, geom.kernel_h, geom.stride_h, geom.pad_h);
    let safe_w = SafeSpan::new(geom.in_w, geom.kernel_w, geom.stride_w, geom.pad_w);
    let pointwise = geom.kernel_h == 1 && geom.kernel_w == 1 && geom.pad_h == 0 && geom.pad_w == 0;
    let in_plane = geom.in_channels * geom.in_h * geom.in_w;
    let out_plane = geom.out_channels * oh * ow;

    let mut acc: AccTile = [[0; TILE_PIXELS]; OC_BLOCK];

    for n in 0..geom.batch {
        let xn = &x[n * in_plane..(n + 1) * in_plane];
        let yn = &mut y[n * out_plane..(n + 1) * out_plane];

        for oc0 in (0..geom.out_channels).step_by(OC_BLOCK) {
            let oc_n = OC_BLOCK.min(geom.out_channels - oc0);
            for oh0 in (0..oh).step_by(TILE_H) {
                for ow0 in (0..ow).step_by(TILE_W) {
                    let tile = Tile {
                        oc0,
                        oc_n,
                        oh0,
                        oh_n: TILE_H.min(oh - oh0),
                        ow0,
                        ow_n: TILE_W.min(ow - ow0),
                    };
                    seed(&mut acc, &tile, bias);

                    match policy {
                        TilePolicy::Auto if pointwise => accumulate_pointwise(&mut acc, xn, w, geom, &tile),
                        TilePolicy::Auto
                            if safe_h.covers(tile.oh0, tile.oh_n)
                                && safe_w.covers(tile.ow0, tile.ow_n) =>
                        {
                            accumulate_interior(&mut acc, xn, w, geom, &tile)
                        }
                        _ => accumulate_boundary(&mut acc, xn, w, geom, &tile),
                    }

                    store(&acc, &tile, multiplier, oh, ow, yn);
                }
            }
        }
    }
    Ok(())
}

fn seed(acc: &mut AccTile, tile: &Tile, bias: Option<&[i32]>) {
    for (o, lane) in acc.iter_mut().enumerate().take(tile.oc_n) {
        let b = bias.map_or(0, |b| b[tile.oc0 + o]);
        lane.fill(b);
    }
}

fn store(acc: &AccTile, tile: &Tile, multiplier: u32, oh: usize, ow: usize, y: &mut [i16]) {
    for o in 0..tile.oc_n {
        let plane = (tile.oc0 + o) * oh * ow;
        for i in 0..tile.oh_n {
            let row = plane + (tile.oh0 + i) * ow + tile.ow0;
            for j in 0..tile.ow_n {
                y[row + j] = requantize(acc[o][i * TILE_W + j], multiplier);
            }
        }
    }
}

/// Adds `a * w[l]` into the live lanes of channels `oc..oc + 4` at pixel `p`.
#[inline(always)]
fn mac4(acc: &mut AccTile, oc: usize, p: usize, a: i32, w: &[i32; 4], live: usize) {
    acc[oc][p] = acc[oc][p].wrapping_add(a * w[0]);
    if live > 1 {
        acc[oc + 1][p] = acc[oc + 1][p].wrapping_add(a * w[1]);
    }
    if live > 2 {
        acc[oc + 2][p] = acc[oc + 2][p].wrapping_add(a * w[2]);
    }
    if live > 3 {
        acc[oc + 3][p] = acc[oc + 3][p].wrapping_add(a * w[3]);
    }
}

/// Channel groups of the tile: `(local channel offset, packed group, live lanes)`.
fn groups(tile: &Tile) -> impl Iterator<Item = (usize, usize, usize)> {
    let (oc0, oc_n) = (tile.oc0, tile.oc_n);
    (0..oc_n)
        .step_by(4)
        .map(move |o| (o, (oc0 + o) / 4, (oc_n - o).min(4)))
}

fn accumulate_interior(
    acc: &mut AccTile,
    x: &[i16],
    w: &PackedWeights<'_>,
    g: &Conv2dGeometry,
    tile: &Tile,
) {
    let plane_len = g.in_h * g.in_w;
    for ic in 0..g.in_channels {
        let plane = &x[ic * plane_len..(ic + 1) * plane_len];
        for ky in 0..g.kernel_h {
            for kx in 0..g.kernel_w {
                for (o, grp, live) in groups(tile) {
                    let word = w.word(grp, ic, ky, kx);
                    if word == 0 {
                        continue;
                    }
                    let lanes = unpack4(word);
                    for i in 0..tile.oh_n {
                        let ih = (tile.oh0 + i) * g.stride_h + ky - g.pad_h;
                        let row = &plane[ih * g.in_w..(ih + 1) * g.in_w];
                        for j in 0..tile.ow_n {
                            let iw = (tile.ow0 + j) * g.stride_w + kx - g.pad_w;
                            mac4(acc, o, i * TILE_W + j, row[iw] as i32, &lanes, live);
                        }
                    }
                }
            }
        }
    }
}

fn accumulate_boundary(
    acc: &mut AccTile,
    x: &[i16],
    w: &PackedWeights<'_>,
    g: &Conv2dGeometry,
    tile: &Tile,
) {
    let plane_len = g.in_h * g.in_w;
    for ic in 0..g.in_channels {
        let plane = &x[ic * plane_len..(ic + 1) * plane_len];
        for ky in 0..g.kernel_h {
            for kx in 0..g.kernel_w {
                for (o, grp, live) in groups(tile) {
                    let word = w.word(grp, ic, ky, kx);
                    if word == 0 {
                        continue;
                    }
                    let lanes = unpack4(word);
                    for i in 0..tile.oh_n {
                        let Some(ih) = ((tile.oh0 + i) * g.stride_h + ky)
                            .checked_sub(g.pad_h)
                            .filter(|&ih| ih < g.in_h)
                        else {
                            continue;
                        };
                        for j in 0..tile.ow_n {
                            let Some(iw) = ((tile.ow0 + j) * g.stride_w + kx)
                                .checked_sub(g.pad_w)
                                .filter(|&iw| iw < g.in_w)
                            else {
                                continue;
                            };
                            let a = plane[ih * g.in_w + iw] as i32;
                            mac4(acc, o, i * TILE_W + j, a, &lanes, live);
                        }
                    }
                }
            }
        }
    }
}

/// Two adjacent activations, read as one 32-bit load when the pair is aligned.
#[inline(always)]
fn load_pair(row: &[i16], at: usize) -> (i32, i32) {
    let pair = &row[at..at + 2];
    let ptr = pair.as_ptr();
    if ptr as usize % 4 != 0 {
        return (pair[0] as i32, pair[1] as i32);
    }
    // SAFETY: `pair` is two in-bounds `i16`s and `ptr` is 4-byte aligned.
    let v = unsafe { ptr.cast::<u32>().read() };
    let (lo, hi) = (v as u16 as i16 as i32, (v >> 16) as u16 as i16 as i32);
    if cfg!(target_endian = "little") {
        (lo, hi)
    } else {
        (hi, lo)
    }
}

/// Unpadded 1x1 layers: every tap is in range.
fn accumulate_pointwise(
    acc: &mut AccTile,
    x: &[i16],
    w: &PackedWeights<'_>,
    g: &Conv2dGeometry,
    tile: &Tile,
) {
    let plane_len = g.in_h * g.in_w;
    for ic in 0..g.in_channels {
        let plane = &x[ic * plane_len..(ic + 1) * plane_len];
        for (o, grp, live) in groups(tile) {
            let word = w.word(grp, ic, 0, 0);
            if word == 0 {
                continue;
            }
            let lanes = unpack4(word);
            for i in 0..tile.oh_n {
                let ih = (tile.oh0 + i) * g.stride_h;
                let row = &plane[ih * g.in_w..(ih + 1) * g.in_w];
                let p = i * TILE_W;
                if g.stride_w == 1 {
                    let mut j = 0;
                    while j + 1 < tile.ow_n {
                        let (a0, a1) = load_pair(row, tile.ow0 + j);
                        mac4(acc, o, p + j, a0, &lanes, live);
                        mac4(acc, o, p + j + 1, a1, &lanes, live);
                        j += 2;
                    }
                    if j < tile.ow_n {
                        mac4(acc, o, p + j, row[tile.ow0 + j] as i32, &lanes, live);
                    }
                } else {
                    for j in 0..tile.ow_n {
                        let iw = (tile.ow0 + j) * g.stride_w;
                        mac4(acc, o, p + j, row[iw] as i32, &lanes, live);
                    }
                }
            }
        }
    }
}
