//! Tensor shapes for NCHW convolution layers.

use crate::err::{QconvError, QconvResult};

/// Shape of a `(out_channel, in_channel, kh, kw)` int8 weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightShape {
    pub out_channels: usize,
    pub in_channels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
}

impl WeightShape {
    pub const fn new(
        out_channels: usize,
        in_channels: usize,
        kernel_h: usize,
        kernel_w: usize,
    ) -> Self {
        Self {
            out_channels,
            in_channels,
            kernel_h,
            kernel_w,
        }
    }

    /// Number of int8 elements in the canonical tensor.
    pub const fn len(&self) -> usize {
        self.out_channels * self.taps_per_channel()
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `in_channels * kh * kw`, the word stride between channel groups.
    pub const fn taps_per_channel(&self) -> usize {
        self.in_channels * self.kernel_h * self.kernel_w
    }

    /// Groups of four output channels, rounded up.
    pub const fn channel_groups(&self) -> usize {
        self.out_channels.div_ceil(4)
    }

    pub const fn software_words(&self) -> usize {
        self.channel_groups() * self.taps_per_channel()
    }

    /// Number of 32-channel PE blocks.
    pub const fn pe_blocks(&self) -> usize {
        self.out_channels.div_ceil(crate::registers::consts::NUM_PE)
    }

    /// Words of one hardware-layout block.
    pub const fn hardware_words(&self) -> usize {
        self.taps_per_channel() * crate::registers::consts::NUM_CLUSTERS
    }

    #[inline(always)]
    pub const fn index(&self, oc: usize, ic: usize, y: usize, x: usize) -> usize {
        ((oc * self.in_channels + ic) * self.kernel_h + y) * self.kernel_w + x
    }
}

/// Hyperparameters of one convolution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conv2dGeometry {
    pub batch: usize,
    pub in_channels: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub out_channels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub groups: usize,
}

impl Conv2dGeometry {
    /// Single-image layer with a square kernel and symmetric stride and padding.
    pub const fn new(
        in_channels: usize,
        in_h: usize,
        in_w: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        pad: usize,
    ) -> Self {
        Self {
            batch: 1,
            in_channels,
            in_h,
            in_w,
            out_channels,
            kernel_h: kernel,
            kernel_w: kernel,
            stride_h: stride,
            stride_w: stride,
            pad_h: pad,
            pad_w: pad,
            groups: 1,
        }
    }

    pub const fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    pub const fn with_kernel(mut self, kernel_h: usize, kernel_w: usize) -> Self {
        self.kernel_h = kernel_h;
        self.kernel_w = kernel_w;
        self
    }

    pub const fn with_stride(mut self, stride_h: usize, stride_w: usize) -> Self {
        self.stride_h = stride_h;
        self.stride_w = stride_w;
        self
    }

    pub const fn with_padding(mut self, pad_h: usize, pad_w: usize) -> Self {
        self.pad_h = pad_h;
        self.pad_w = pad_w;
        self
    }

    pub const fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub const fn padded_h(&self) -> usize {
        self.in_h + 2 * self.pad_h
    }

    pub const fn padded_w(&self) -> usize {
        self.in_w + 2 * self.pad_w
    }

    /// Output height.
    ///
    /// # Panics
    ///
    /// On a zero stride or a kernel taller than the padded input; run
    /// [`validate`](Self::validate) first. The same holds for [`out_w`](Self::out_w),
    /// [`output_len`](Self::output_len) and everything sized from them.
    pub const fn out_h(&self) -> usize {
        (self.padded_h() - self.kernel_h) / self.stride_h + 1
    }

    pub const fn out_w(&self) -> usize {
        (self.padded_w() - self.kernel_w) / self.stride_w + 1
    }

    pub const fn input_len(&self) -> usize {
        self.batch * self.in_channels * self.in_h * self.in_w
    }

    pub const fn output_len(&self) -> usize {
        self.batch * self.out_channels * self.out_h() * self.out_w()
    }

    pub const fn weight_shape(&self) -> WeightShape {
        WeightShape::new(
            self.out_channels,
            self.in_channels,
            self.kernel_h,
            self.kernel_w,
        )
    }

    pub fn validate(&self) -> QconvResult<()> {
        if self.groups != 1 {
            return Err(QconvError::UnsupportedGroups(self.groups));
        }
        let dims = [
            self.batch,
            self.in_channels,
            self.in_h,
            self.in_w,
            self.out_channels,
            self.kernel_h,
            self.kernel_w,
            self.stride_h,
            self.stride_w,
        ];
        if dims.contains(&0)
            || self.kernel_h > self.padded_h()
            || self.kernel_w > self.padded_w()
        {
            return Err(QconvError::InvalidGeometry);
        }
        Ok(())
    }

    /// Validates the geometry and the lengths of the input and output buffers.
    pub fn check_buffers(&self, input: usize, output: usize) -> QconvResult<()> {
        self.validate()?;
        check_len(self.input_len(), input)?;
        check_len(self.output_len(), output)
    }
}

pub(crate) fn check_len(expected: usize, actual: usize) -> QconvResult<()> {
    if expected != actual {
        return Err(QconvError::ShapeMismatch { expected, actual });
    }
    Ok(())
}
