//! Driver that offloads one convolution layer to the PE array.
//!
//! A layer is processed one 32-output-channel block at a time. The first
//! output row of a block loads bias and weights with `START_LOAD` asserted;
//! every row then streams `kh` activation lines and reads back one output row
//! of `w_out x 32` channels, two per word.

mod port;

pub use port::{AccelPort, AxiPort, HostPort, RunConfig};

use spin::Mutex;

use crate::{
    err::{AccelError, QconvError, QconvResult, Transfer},
    pack::{fixed_bias_block, pack_hardware},
    registers::consts::{BIAS_BYTES, MAX_KERNEL, MAX_W_LINE, NUM_PE, OUT_WORDS_PER_PIXEL},
    tensor::{Conv2dGeometry, check_len},
};

/// Bytes of scratch one layer needs: bias, one block of packed weights,
/// `kh` activation lines and one output row.
///
/// Panics like [`Conv2dGeometry::out_w`] on a geometry that fails
/// [`Conv2dGeometry::validate`].
pub const fn scratch_size(geom: &Conv2dGeometry) -> usize {
    BIAS_BYTES
        + geom.weight_shape().hardware_words() * 4
        + geom.kernel_h * MAX_W_LINE * 4
        + geom.out_w() * OUT_WORDS_PER_PIXEL * 4
}

/// Hardware limits a layer has to satisfy before anything is transferred.
pub fn check_layer(geom: &Conv2dGeometry) -> Result<(), AccelError> {
    if geom.in_channels % 2 != 0 {
        return Err(AccelError::OddInputChannels(geom.in_channels));
    }
    if geom.stride_h > 2 || geom.stride_w > 2 {
        return Err(AccelError::StrideTooLarge {
            stride_h: geom.stride_h,
            stride_w: geom.stride_w,
        });
    }
    let padded_w = geom.padded_w();
    if padded_w < geom.kernel_w {
        return Err(AccelError::KernelWiderThanImage {
            padded_w,
            kernel_w: geom.kernel_w,
        });
    }
    let words = padded_w * (geom.in_channels / 2);
    if words > MAX_W_LINE {
        return Err(AccelError::LineTooLong {
            words,
            max: MAX_W_LINE,
        });
    }
    if geom.kernel_h != geom.kernel_w || geom.kernel_h > MAX_KERNEL {
        return Err(AccelError::UnsupportedKernel {
            kernel_h: geom.kernel_h,
            kernel_w: geom.kernel_w,
        });
    }
    Ok(())
}

/// Packs input line `line` of the padded image into `dst`.
///
/// Words are ordered column-major over channel pairs: word `col * c_in/2 + p`
/// holds channel `2p` in the low half and `2p + 1` in the high half. Padding
/// and the tail up to the line capacity are zero.
pub fn pack_activation_line(x: &[i16], geom: &Conv2dGeometry, line: usize, dst: &mut [u32]) {
    let pairs = geom.in_channels / 2;
    let plane = geom.in_h * geom.in_w;
    let padded_w = geom.padded_w();
    let (used, tail) = dst.split_at_mut(padded_w * pairs);
    tail.fill(0);

    let row = line.checked_sub(geom.pad_h).filter(|&r| r < geom.in_h);
    for (col, words) in used.chunks_exact_mut(pairs).enumerate() {
        let src = col.checked_sub(geom.pad_w).filter(|&c| c < geom.in_w);
        let (Some(r), Some(c)) = (row, src) else {
            words.fill(0);
            continue;
        };
        let at = r * geom.in_w + c;
        for (p, word) in words.iter_mut().enumerate() {
            let lo = x[2 * p * plane + at] as u16 as u32;
            let hi = x[(2 * p + 1) * plane + at] as u16 as u32;
            *word = lo | hi << 16;
        }
    }
}

/// Scatters one received output row of block `block` into NCHW `y`.
pub fn unpack_output_row(out: &[u32], geom: &Conv2dGeometry, block: usize, row: usize, y: &mut [i16]) {
    let (oh, ow) = (geom.out_h(), geom.out_w());
    let oc0 = block * NUM_PE;
    let live = NUM_PE.min(geom.out_channels - oc0);
    for (col, pix) in out.chunks_exact(OUT_WORDS_PER_PIXEL).take(ow).enumerate() {
        for ch in 0..live {
            let word = pix[ch / 2];
            let v = if ch & 1 == 1 { word >> 16 } else { word & 0xFFFF };
            y[((oc0 + ch) * oh + row) * ow + col] = v as u16 as i16;
        }
    }
}

/// Working set carved out of one scratch allocation.
struct Sections<'a> {
    bias: &'a mut [u32],
    weights: &'a mut [u32],
    act: &'a mut [u32],
    out: &'a mut [u32],
}

impl<'a> Sections<'a> {
    fn split(scratch: &'a mut [u32], geom: &Conv2dGeometry) -> Self {
        let (bias, rest) = scratch.split_at_mut(NUM_PE);
        let (weights, rest) = rest.split_at_mut(geom.weight_shape().hardware_words());
        let (act, rest) = rest.split_at_mut(geom.kernel_h * MAX_W_LINE);
        let out = &mut rest[..geom.out_w() * OUT_WORDS_PER_PIXEL];
        Self {
            bias,
            weights,
            act,
            out,
        }
    }
}

/// The PE array driver. The port sits behind a lock so a shared reference
/// can run layers.
pub struct ConvAccelerator<P> {
    port: Mutex<P>,
}

impl<P: AccelPort> ConvAccelerator<P> {
    pub fn new(port: P) -> Self {
        Self {
            port: Mutex::new(port),
        }
    }

    /// Initializes the DMA engine.
    pub fn open(&self) -> Result<(), AccelError> {
        self.port.lock().open()
    }

    pub fn close(&self) {
        self.port.lock().close();
    }

    pub fn is_ready(&self) -> bool {
        self.port.lock().is_ready()
    }

    pub fn into_port(self) -> P {
        self.port.into_inner()
    }

    /// The refusals of [`layer_run`](Self::layer_run) that depend on neither the
    /// buffers nor the scratch: hardware limits, port support and readiness.
    pub fn accepts(&self, geom: &Conv2dGeometry) -> Result<(), AccelError> {
        check_layer(geom)?;
        if !P::SUPPORTED {
            return Err(AccelError::Unsupported);
        }
        if !self.is_ready() {
            return Err(AccelError::DmaNotReady);
        }
        Ok(())
    }

    /// Runs one layer on the PE array.
    ///
    /// `w` is the canonical `(oc, ic, kh, kw)` int8 tensor, `bias` is in the
    /// accumulator domain, `scratch` holds at least [`scratch_size`] bytes.
    /// Every precondition is checked before the first write to `y`. A transfer
    /// failure can leave `y` partially written.
    #[allow(clippy::too_many_arguments)]
    pub fn layer_run(
        &self,
        x: &[i16],
        w: &[i8],
        bias: Option<&[i32]>,
        multiplier: u32,
        geom: &Conv2dGeometry,
        y: &mut [i16],
        scratch: &mut [u32],
    ) -> QconvResult<()> {
        geom.check_buffers(x.len(), y.len())?;
        let shape = geom.weight_shape();
        check_len(shape.len(), w.len())?;
        if let Some(b) = bias {
            if b.len() < geom.out_channels {
                return Err(QconvError::ShapeMismatch {
                    expected: geom.out_channels,
                    actual: b.len(),
                });
            }
        }
        check_layer(geom)?;

        let need = scratch_size(geom);
        if scratch.is_empty() {
            return Err(AccelError::ScratchMissing.into());
        }
        if scratch.len() * 4 < need {
            return Err(AccelError::ScratchTooSmall {
                need,
                have: scratch.len() * 4,
            }
            .into());
        }
        if !P::SUPPORTED {
            return Err(AccelError::Unsupported.into());
        }

        let mut port = self.port.lock();
        if !port.is_ready() {
            return Err(AccelError::DmaNotReady.into());
        }

        let mut s = Sections::split(scratch, geom);
        let run = RunConfig {
            kernel_size: geom.kernel_h as u32,
            target_ic: geom.in_channels as u32,
            img_width: geom.padded_w() as u32,
            stride: geom.stride_w as u32,
            act_start: 0,
            multiplier,
        };
        let (oh, ow) = (geom.out_h(), geom.out_w());
        let in_len = geom.in_channels * geom.in_h * geom.in_w;
        let out_len = geom.out_channels * oh * ow;

        for n in 0..geom.batch {
            let xn = &x[n * in_len..(n + 1) * in_len];
            let yn = &mut y[n * out_len..(n + 1) * out_len];

            for block in 0..shape.pe_blocks() {
                let fixed = fixed_bias_block(bias, geom.out_channels, block);
                for (dst, b) in s.bias.iter_mut().zip(fixed) {
                    *dst = b as u32;
                }
                pack_hardware(w, shape, block, s.weights)?;
                debug!("accelerator: image {n} block {block}, {oh} rows");

                for row in 0..oh {
                    for (l, line) in s.act.chunks_exact_mut(MAX_W_LINE).enumerate() {
                        pack_activation_line(xn, geom, row * geom.stride_h + l, line);
                    }
                    run_once(&mut *port, &run, &mut s, row == 0)?;
                    unpack_output_row(s.out, geom, block, row, yn);
                }
            }
        }
        Ok(())
    }
}

fn run_once<P: AccelPort>(
    port: &mut P,
    run: &RunConfig,
    s: &mut Sections<'_>,
    first_row: bool,
) -> Result<(), AccelError> {
    port.configure(run);
    if first_row {
        port.set_start_load(true);
        port.send(Transfer::Bias, s.bias)?;
        port.send(Transfer::Weights, s.weights)?;
    }
    port.set_start_load(false);
    port.send(Transfer::Activation, s.act)?;
    port.receive(s.out)
}
