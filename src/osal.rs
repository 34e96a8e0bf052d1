//! Operating System Abstraction Layer (OSAL) for the accelerator driver
//!
//! The driver itself never touches caches or clocks directly. Cache maintenance
//! around DMA buffers and the way the CPU waits for a transfer are supplied by
//! the platform through the traits below, so host builds can plug in
//! deterministic stand-ins.

/// Bus address as seen by the DMA engine.
pub type DmaAddr = u64;

/// DMA synchronization direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaSyncDirection {
    /// Flush CPU writes so the device reads current data.
    ToDevice,
    /// Invalidate stale lines before the CPU reads what the device wrote.
    FromDevice,
}

/// Platform hooks around DMA buffers.
pub trait Osal {
    /// Cache maintenance over `len` bytes starting at virtual address `addr`.
    fn dma_sync(&self, addr: usize, len: usize, dir: DmaSyncDirection);

    /// Translates a CPU address into the DMA engine's address space.
    fn dma_addr(&self, virt: usize) -> DmaAddr {
        virt as DmaAddr
    }
}

/// Cache-coherent, identity-mapped platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoherentOsal;

impl Osal for CoherentOsal {
    fn dma_sync(&self, _addr: usize, _len: usize, _dir: DmaSyncDirection) {}
}

/// How the CPU waits for a condition to clear.
pub trait WaitStrategy {
    /// Calls `busy` until it returns `false`, at most `limit` times.
    ///
    /// Returns the number of polls spent when the bound was reached.
    fn wait_while(&self, limit: u32, busy: &mut dyn FnMut() -> bool) -> Result<(), u32>;
}

/// Tight spin with [`core::hint::spin_loop`] between polls.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusyPoll;

impl WaitStrategy for BusyPoll {
    fn wait_while(&self, limit: u32, busy: &mut dyn FnMut() -> bool) -> Result<(), u32> {
        for _ in 0..limit {
            if !busy() {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(limit)
    }
}
