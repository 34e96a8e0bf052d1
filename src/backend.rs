//! Per-layer choice between the PE array and the software kernel.
//!
//! The accelerator is tried only when the port supports it and both strides
//! are at most 2. Any error it reports, including running out of scratch,
//! sends the layer to the software kernel, which then rewrites every output
//! element. Both paths read the same canonical weights, bias and multiplier.
//!
//! The software packing buffer is reserved before the accelerator working set,
//! so a late accelerator failure never leaves the fallback short of scratch.

use spin::Mutex;

use crate::{
    accel::{AccelPort, ConvAccelerator, HostPort, scratch_size},
    activation::{Activation, SiluTable, silu_f32_in_place},
    arena::ScratchArena,
    err::QconvResult,
    fixed::quantize_slice,
    kernel::{FloatWeights, Int8Weights, conv2d_f32, conv2d_q610},
    pack::{PackedWeights, pack_software_into},
    store::{ConvWeights, QuantizedConv},
    tensor::{Conv2dGeometry, check_len},
};

/// Where a layer ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Hardware,
    Software,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub hardware_layers: u32,
    pub software_layers: u32,
    /// Layers that tried the accelerator and ended up in software.
    pub fallbacks: u32,
}

pub struct ConvDispatcher<P> {
    accel: ConvAccelerator<P>,
    stats: Mutex<DispatchStats>,
}

impl ConvDispatcher<HostPort> {
    /// Dispatcher without an accelerator.
    pub fn software() -> Self {
        Self::new(ConvAccelerator::new(HostPort))
    }
}

impl<P: AccelPort> ConvDispatcher<P> {
    pub fn new(accel: ConvAccelerator<P>) -> Self {
        Self {
            accel,
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    pub fn accelerator(&self) -> &ConvAccelerator<P> {
        &self.accel
    }

    pub fn into_accelerator(self) -> ConvAccelerator<P> {
        self.accel
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.lock()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = DispatchStats::default();
    }

    /// Whether a layer is a candidate for the accelerator at all.
    pub fn prefers_hardware(&self, geom: &Conv2dGeometry) -> bool {
        P::SUPPORTED && geom.stride_h <= 2 && geom.stride_w <= 2
    }

    /// Integer convolution into `y`, Q6.10 in and out.
    ///
    /// Temporaries (packed weights, accelerator working set) come from
    /// `scratch` and stay allocated until the arena is reset. Unless the layer
    /// carries prepacked weights, `scratch` must hold the software packing
    /// buffer whichever backend ends up running.
    pub fn conv(
        &self,
        scratch: &ScratchArena<'_>,
        x: &[i16],
        layer: &QuantizedConv<'_>,
        geom: &Conv2dGeometry,
        y: &mut [i16],
    ) -> QconvResult<Backend> {
        geom.check_buffers(x.len(), y.len())?;
        let shape = geom.weight_shape();
        check_len(shape.len(), layer.weights.len())?;

        let pack_buf = match layer.packed {
            Some(_) => None,
            None => Some(scratch.alloc_slice::<u32>(shape.software_words())?),
        };

        if self.prefers_hardware(geom) {
            match self.run_hardware(scratch, x, layer, geom, y) {
                Ok(()) => {
                    self.stats.lock().hardware_layers += 1;
                    debug!(
                        "conv {}x{}x{} -> {} on accelerator",
                        geom.in_channels, geom.in_h, geom.in_w, geom.out_channels
                    );
                    return Ok(Backend::Hardware);
                }
                Err(e) => {
                    warn!("accelerator rejected layer ({e}), running in software");
                    self.stats.lock().fallbacks += 1;
                }
            }
        }

        self.run_software(x, layer, geom, pack_buf, y)?;
        self.stats.lock().software_layers += 1;
        Ok(Backend::Software)
    }

    /// [`conv`](Self::conv) followed by SiLU.
    pub fn conv_silu(
        &self,
        scratch: &ScratchArena<'_>,
        x: &[i16],
        layer: &QuantizedConv<'_>,
        geom: &Conv2dGeometry,
        silu: &SiluTable,
        y: &mut [i16],
    ) -> QconvResult<Backend> {
        let backend = self.conv(scratch, x, layer, geom, y)?;
        silu.apply_in_place(y);
        Ok(backend)
    }

    /// First-layer convolution of a float image, quantized into Q6.10 `y`.
    ///
    /// Always runs in software; int8 weights are dequantized tap by tap.
    #[allow(clippy::too_many_arguments)]
    pub fn conv_f32(
        &self,
        scratch: &ScratchArena<'_>,
        x: &[f32],
        weights: ConvWeights<'_>,
        bias: Option<&[f32]>,
        geom: &Conv2dGeometry,
        activation: Activation,
        y: &mut [i16],
    ) -> QconvResult<()> {
        geom.check_buffers(x.len(), y.len())?;
        let shape = geom.weight_shape();
        let tmp = scratch.alloc_slice::<f32>(geom.output_len())?;
        match weights {
            ConvWeights::Int8 { data, scale } => {
                conv2d_f32(x, &Int8Weights::new(data, scale, shape)?, bias, geom, tmp)?
            }
            ConvWeights::Float(data) => {
                conv2d_f32(x, &FloatWeights::new(data, shape)?, bias, geom, tmp)?
            }
        }
        if activation == Activation::Silu {
            silu_f32_in_place(tmp);
        }
        quantize_slice(tmp, y)?;
        self.stats.lock().software_layers += 1;
        Ok(())
    }

    fn run_hardware(
        &self,
        scratch: &ScratchArena<'_>,
        x: &[i16],
        layer: &QuantizedConv<'_>,
        geom: &Conv2dGeometry,
        y: &mut [i16],
    ) -> QconvResult<()> {
        self.accel.accepts(geom)?;
        let working = scratch.alloc_slice::<u32>(scratch_size(geom) / 4)?;
        self.accel
            .layer_run(x, layer.weights, layer.bias, layer.multiplier, geom, y, working)
    }

    fn run_software(
        &self,
        x: &[i16],
        layer: &QuantizedConv<'_>,
        geom: &Conv2dGeometry,
        pack_buf: Option<&mut [u32]>,
        y: &mut [i16],
    ) -> QconvResult<()> {
        let shape = geom.weight_shape();
        let words: &[u32] = match pack_buf {
            Some(buf) => {
                pack_software_into(layer.weights, shape, buf)?;
                buf
            }
            None => layer.packed.unwrap_or(&[]),
        };
        let w = PackedWeights::new(words, shape)?;
        conv2d_q610(x, &w, layer.bias, layer.multiplier, geom, y)
    }
}
