//! Floating-point input convolution, used before activations are quantized.

use crate::{
    err::{QconvError, QconvResult},
    tensor::{Conv2dGeometry, WeightShape, check_len},
};

/// A weight tensor readable as real-valued taps.
pub trait FloatTaps {
    fn shape(&self) -> WeightShape;

    /// Real weight at canonical index `i` (see [`WeightShape::index`]).
    fn tap(&self, i: usize) -> f32;
}

#[derive(Debug, Clone, Copy)]
pub struct FloatWeights<'a> {
    data: &'a [f32],
    shape: WeightShape,
}

impl<'a> FloatWeights<'a> {
    pub fn new(data: &'a [f32], shape: WeightShape) -> QconvResult<Self> {
        check_len(shape.len(), data.len())?;
        Ok(Self { data, shape })
    }
}

impl FloatTaps for FloatWeights<'_> {
    fn shape(&self) -> WeightShape {
        self.shape
    }

    #[inline(always)]
    fn tap(&self, i: usize) -> f32 {
        self.data[i]
    }
}

/// int8 weights dequantized on every read.
#[derive(Debug, Clone, Copy)]
pub struct Int8Weights<'a> {
    data: &'a [i8],
    scale: f32,
    shape: WeightShape,
}

impl<'a> Int8Weights<'a> {
    pub fn new(data: &'a [i8], scale: f32, shape: WeightShape) -> QconvResult<Self> {
        check_len(shape.len(), data.len())?;
        Ok(Self { data, scale, shape })
    }
}

impl FloatTaps for Int8Weights<'_> {
    fn shape(&self) -> WeightShape {
        self.shape
    }

    #[inline(always)]
    fn tap(&self, i: usize) -> f32 {
        self.data[i] as f32 * self.scale
    }
}

/// `y = conv(x, w) + bias` in `f32`, NCHW.
pub fn conv2d_f32<W: FloatTaps + ?Sized>(
    x: &[f32],
    w: &W,
    bias: Option<&[f32]>,
    geom: &Conv2dGeometry,
    y: &mut [f32],
) -> QconvResult<()> {
    geom.check_buffers(x.len(), y.len())?;
    let shape = w.shape();
    if shape != geom.weight_shape() {
        return Err(QconvError::ShapeMismatch {
            expected: geom.weight_shape().len(),
            actual: shape.len(),
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
    let plane_len = geom.in_h * geom.in_w;
    let in_len = geom.in_channels * plane_len;
    let out_len = geom.out_channels * oh * ow;

    for n in 0..geom.batch {
        let xn = &x[n * in_len..(n + 1) * in_len];
        let yn = &mut y[n * out_len..(n + 1) * out_len];
        for oc in 0..geom.out_channels {
            let b = bias.map_or(0.0, |b| b[oc]);
            yn[oc * oh * ow..(oc + 1) * oh * ow].fill(b);
            for ic in 0..geom.in_channels {
                let plane = &xn[ic * plane_len..(ic + 1) * plane_len];
                for ky in 0..geom.kernel_h {
                    for kx in 0..geom.kernel_w {
                        let wv = w.tap(shape.index(oc, ic, ky, kx));
                        if wv == 0.0 {
                            continue;
                        }
                        for r in 0..oh {
                            let Some(ih) = (r * geom.stride_h + ky)
                                .checked_sub(geom.pad_h)
                                .filter(|&ih| ih < geom.in_h)
                            else {
                                continue;
                            };
                            let out_row = &mut yn[(oc * oh + r) * ow..(oc * oh + r + 1) * ow];
                            for (c, out) in out_row.iter_mut().enumerate() {
                                let Some(iw) = (c * geom.stride_w + kx)
                                    .checked_sub(geom.pad_w)
                                    .filter(|&iw| iw < geom.in_w)
                                else {
                                    continue;
                                };
                                *out += plane[ih * geom.in_w + iw] * wv;
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
