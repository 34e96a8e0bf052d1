//! Raw offsets and limits of the PE array and its AXI DMA.

/// Output channels handled by one weight load.
pub const NUM_PE: usize = 32;
/// PE clusters, four channels each.
pub const NUM_CLUSTERS: usize = 8;
/// Capacity of one activation line in 32-bit words.
pub const MAX_W_LINE: usize = 3072;
/// Bias section: one `i32` per PE.
pub const BIAS_BYTES: usize = NUM_PE * 4;
/// Output words per pixel: 32 channels, two per word.
pub const OUT_WORDS_PER_PIXEL: usize = NUM_PE / 2;
/// Largest value the 4-bit kernel-size field carries.
pub const MAX_KERNEL: usize = 15;
/// Largest value of the 7-bit activation-start field.
pub const MAX_ACT_START: u32 = 127;

/// Internal, slave and decode error bits of DMASR.
pub const DMA_ERR_ALL_MASK: u32 = 0x770;
