/// DMA transfer kinds used by the accelerator protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Bias,
    Weights,
    Activation,
    Output,
}

/// Failures reported by the convolution accelerator.
///
/// Every variant maps to a distinct negative integer through [`AccelError::code`],
/// zero being the implicit success value.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelError {
    #[error("input channel count {0} is odd")]
    OddInputChannels(usize),
    #[error("stride {stride_h}x{stride_w} exceeds 2")]
    StrideTooLarge { stride_h: usize, stride_w: usize },
    #[error("padded width {padded_w} is narrower than the kernel ({kernel_w})")]
    KernelWiderThanImage { padded_w: usize, kernel_w: usize },
    #[error("scratch region missing")]
    ScratchMissing,
    #[error("scratch too small: need {need} bytes, have {have}")]
    ScratchTooSmall { need: usize, have: usize },
    #[error("DMA channel not initialized")]
    DmaNotReady,
    #[error("packed line of {words} words exceeds {max}")]
    LineTooLong { words: usize, max: usize },
    #[error("DMA receive timed out after {0} polls")]
    RxTimeout(u32),
    #[error("kernel {kernel_h}x{kernel_w} not supported by the PE array")]
    UnsupportedKernel { kernel_h: usize, kernel_w: usize },
    #[error("accelerator not available on this build")]
    Unsupported,
    #[error("DMA submission failed for {0:?} transfer")]
    Submit(Transfer),
    #[error("DMA transmit timed out after {0} polls")]
    TxTimeout(u32),
}

impl AccelError {
    /// Negative status code of the wire-level driver contract.
    pub const fn code(&self) -> i32 {
        match self {
            AccelError::OddInputChannels(_) => -1,
            AccelError::StrideTooLarge { .. } => -2,
            AccelError::KernelWiderThanImage { .. } => -3,
            AccelError::ScratchMissing => -4,
            AccelError::ScratchTooSmall { .. } => -5,
            AccelError::DmaNotReady => -6,
            AccelError::LineTooLong { .. } => -7,
            AccelError::RxTimeout(_) => -8,
            AccelError::UnsupportedKernel { .. } => -9,
            AccelError::Unsupported => -10,
            AccelError::Submit(Transfer::Bias) => -11,
            AccelError::Submit(Transfer::Weights) => -12,
            AccelError::Submit(Transfer::Activation) => -13,
            AccelError::Submit(Transfer::Output) => -14,
            AccelError::TxTimeout(_) => -15,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QconvError {
    #[error("scratch arena exhausted: requested {requested} bytes, {remaining} remaining")]
    ArenaExhausted { requested: usize, remaining: usize },
    #[error("buffer length mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("groups={0} is not supported")]
    UnsupportedGroups(usize),
    #[error("invalid convolution geometry")]
    InvalidGeometry,
    #[error("weight tensor not found in the store")]
    MissingTensor,
    #[error("integer kernel needs int8 weights, store holds f32")]
    NotQuantized,
    #[error("pool block does not belong to this pool")]
    ForeignBlock,
    #[error(transparent)]
    Accel(#[from] AccelError),
}

pub type QconvResult<T> = Result<T, QconvError>;
