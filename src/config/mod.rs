//! Board and accelerator configuration presets.

/// Poll bound used for both DMA directions unless a preset says otherwise.
pub const DEFAULT_POLL_LIMIT: u32 = 50_000_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccelType {
    /// 32-PE array (8 clusters of 4) behind two AXI GPIO blocks and one AXI DMA.
    Pe32Gpio,
}

/// Where the accelerator lives and how long the driver waits for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelConfig {
    pub ty: AccelType,
    /// GPIO block holding the target input-channel count.
    pub gpio_target_base: usize,
    /// GPIO block holding the multiplier and the control word.
    pub gpio_control_base: usize,
    pub dma_base: usize,
    /// Largest byte count one simple-mode transfer accepts.
    pub dma_max_transfer: u32,
    pub tx_poll_limit: u32,
    pub rx_poll_limit: u32,
}

impl AccelConfig {
    pub fn new(ty: AccelType) -> Self {
        match ty {
            AccelType::Pe32Gpio => Self::new_pe32(),
        }
    }

    fn new_pe32() -> Self {
        Self {
            ty: AccelType::Pe32Gpio,
            gpio_target_base: 0x4000_0000,
            gpio_control_base: 0x4001_0000,
            dma_base: 0x4040_0000,
            dma_max_transfer: (1 << 23) - 1,
            tx_poll_limit: DEFAULT_POLL_LIMIT,
            rx_poll_limit: DEFAULT_POLL_LIMIT,
        }
    }

    pub fn with_poll_limits(mut self, tx: u32, rx: u32) -> Self {
        self.tx_poll_limit = tx;
        self.rx_poll_limit = rx;
        self
    }
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self::new(AccelType::Pe32Gpio)
    }
}

const MIB: usize = 1024 * 1024;

/// Activation width the network was built for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActivationFormat {
    /// int8 weights, Q6.10 activations.
    W8A16,
    /// int8 weights, f32 activations.
    W8A32,
}

/// DDR map of the embedded board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub format: ActivationFormat,
    pub ddr_base: usize,
    pub feature_pool_base: usize,
    pub feature_pool_size: usize,
    pub weights_base: usize,
    pub weights_size: usize,
    /// Window for the int8 weight blob; scales travel inside it.
    pub weights_w8_size: usize,
    pub detect_head_base: usize,
    pub detect_head_size: usize,
    pub image_base: usize,
    pub image_size: usize,
    pub cpu_mhz: u32,
}

impl PlatformConfig {
    pub fn new(format: ActivationFormat) -> Self {
        let ddr_base = 0x8000_0000;
        let image_base = ddr_base + 0x0F00_0000;
        Self {
            format,
            ddr_base,
            feature_pool_base: ddr_base + 0x0200_0000,
            // Q6.10 scratch for the largest block set does not fit 32 MiB.
            feature_pool_size: match format {
                ActivationFormat::W8A16 => 48 * MIB,
                ActivationFormat::W8A32 => 32 * MIB,
            },
            weights_base: ddr_base + 0x0800_0000,
            weights_size: 16 * MIB,
            weights_w8_size: 8 * MIB,
            detect_head_base: ddr_base + 0x0E00_0000,
            detect_head_size: 9 * MIB,
            image_base,
            image_size: 16 * MIB,
            cpu_mhz: 100,
        }
    }

    /// Cycle counter delta to whole milliseconds.
    pub fn cycles_to_ms(&self, cycles: u64) -> u64 {
        cycles / (self.cpu_mhz as u64 * 1000)
    }

    /// Last page of the image window, where detections are written back.
    pub fn detections_base(&self) -> usize {
        self.image_base + self.image_size - 4096
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::new(ActivationFormat::W8A16)
    }
}
