//! AXI DMA register file, direct-register (simple) mode.

use core::ptr::NonNull;

use tock_registers::{
    LocalRegisterCopy,
    interfaces::{ReadWriteable, Readable, Writeable},
    register_structs,
    registers::ReadWrite,
};

use super::consts::DMA_ERR_ALL_MASK;
use crate::osal::DmaAddr;

register_structs! {
    pub AxiDmaRegs {
        (0x0000 => pub mm2s_dmacr: ReadWrite<u32, DMACR::Register>),
        (0x0004 => pub mm2s_dmasr: ReadWrite<u32, DMASR::Register>),
        (0x0008 => _reserved0),
        (0x0018 => pub mm2s_sa: ReadWrite<u32>),
        (0x001C => pub mm2s_sa_msb: ReadWrite<u32>),
        (0x0020 => _reserved1),
        (0x0028 => pub mm2s_length: ReadWrite<u32>),
        (0x002C => _reserved2),
        (0x0030 => pub s2mm_dmacr: ReadWrite<u32, DMACR::Register>),
        (0x0034 => pub s2mm_dmasr: ReadWrite<u32, DMASR::Register>),
        (0x0038 => _reserved3),
        (0x0048 => pub s2mm_da: ReadWrite<u32>),
        (0x004C => pub s2mm_da_msb: ReadWrite<u32>),
        (0x0050 => _reserved4),
        (0x0058 => pub s2mm_length: ReadWrite<u32>),
        (0x005C => @END),
    }
}

tock_registers::register_bitfields! {u32,
    pub DMACR [
        RS OFFSET(0) NUMBITS(1) [],
        RESET OFFSET(2) NUMBITS(1) [],
        IOC_IRQ_EN OFFSET(12) NUMBITS(1) [],
        ERR_IRQ_EN OFFSET(14) NUMBITS(1) []
    ],

    pub DMASR [
        HALTED OFFSET(0) NUMBITS(1) [],
        IDLE OFFSET(1) NUMBITS(1) [],
        DMA_INT_ERR OFFSET(4) NUMBITS(1) [],
        DMA_SLV_ERR OFFSET(5) NUMBITS(1) [],
        DMA_DEC_ERR OFFSET(6) NUMBITS(1) [],
        IOC_IRQ OFFSET(12) NUMBITS(1) [],
        ERR_IRQ OFFSET(14) NUMBITS(1) []
    ]
}

/// Transfer direction, named from the memory side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Memory to stream (MM2S).
    ToDevice,
    /// Stream to memory (S2MM).
    FromDevice,
}

struct Channel<'a> {
    cr: &'a ReadWrite<u32, DMACR::Register>,
    sr: &'a ReadWrite<u32, DMASR::Register>,
    addr: &'a ReadWrite<u32>,
    addr_msb: &'a ReadWrite<u32>,
    length: &'a ReadWrite<u32>,
}

pub struct AxiDma {
    base: NonNull<AxiDmaRegs>,
}
unsafe impl Send for AxiDma {}

impl AxiDma {
    /// # Safety
    ///
    /// `base` must map the AXI DMA register file for the lifetime of the
    /// returned object.
    pub const unsafe fn new(base: NonNull<u8>) -> Self {
        Self { base: base.cast() }
    }

    fn regs(&self) -> &AxiDmaRegs {
        unsafe { self.base.as_ref() }
    }

    fn channel(&self, dir: DmaDirection) -> Channel<'_> {
        let r = self.regs();
        match dir {
            DmaDirection::ToDevice => Channel {
                cr: &r.mm2s_dmacr,
                sr: &r.mm2s_dmasr,
                addr: &r.mm2s_sa,
                addr_msb: &r.mm2s_sa_msb,
                length: &r.mm2s_length,
            },
            DmaDirection::FromDevice => Channel {
                cr: &r.s2mm_dmacr,
                sr: &r.s2mm_dmasr,
                addr: &r.s2mm_da,
                addr_msb: &r.s2mm_da_msb,
                length: &r.s2mm_length,
            },
        }
    }

    /// Soft reset of both channels. Completion is signalled by
    /// [`reset_pending`](Self::reset_pending) going false.
    pub fn reset(&self) {
        self.regs().mm2s_dmacr.write(DMACR::RESET::SET);
    }

    pub fn reset_pending(&self) -> bool {
        self.regs().mm2s_dmacr.is_set(DMACR::RESET)
    }

    /// Interrupts stay masked; completion is polled.
    pub fn disable_interrupts(&self) {
        for dir in [DmaDirection::ToDevice, DmaDirection::FromDevice] {
            self.channel(dir)
                .cr
                .modify(DMACR::IOC_IRQ_EN::CLEAR + DMACR::ERR_IRQ_EN::CLEAR);
        }
    }

    pub fn status(&self, dir: DmaDirection) -> LocalRegisterCopy<u32, DMASR::Register> {
        self.channel(dir).sr.extract()
    }

    /// A channel is busy until it reports idle.
    pub fn is_busy(&self, dir: DmaDirection) -> bool {
        !self.channel(dir).sr.is_set(DMASR::IDLE)
    }

    /// Starts one simple-mode transfer of `len` bytes.
    ///
    /// Returns `false` without touching the channel if it is still running a
    /// previous transfer or `len` is zero.
    pub fn submit(&self, dir: DmaDirection, addr: DmaAddr, len: u32) -> bool {
        let ch = self.channel(dir);
        let sr = ch.sr.extract();
        if len == 0 || (!sr.is_set(DMASR::HALTED) && !sr.is_set(DMASR::IDLE)) {
            return false;
        }
        ch.addr.set(addr as u32);
        ch.addr_msb.set((addr >> 32) as u32);
        ch.cr.modify(DMACR::RS::SET);
        // Writing the length starts the transfer.
        ch.length.set(len);
        true
    }
}

/// Error bits of a status snapshot.
pub fn error_bits(sr: LocalRegisterCopy<u32, DMASR::Register>) -> u32 {
    sr.get() & DMA_ERR_ALL_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(4))]
    struct Mmio([u32; 0x5C / 4]);

    #[test]
    fn submit_programs_the_right_bank() {
        let mut mem = Mmio([0; 0x5C / 4]);
        mem.0[0x04 / 4] = 0x2; // MM2S idle
        mem.0[0x34 / 4] = 0x1; // S2MM halted
        let dma = unsafe { AxiDma::new(NonNull::from(&mut mem).cast()) };

        assert!(dma.submit(DmaDirection::ToDevice, 0x1_8000_0040, 128));
        assert!(dma.submit(DmaDirection::FromDevice, 0x8000_1000, 64));
        assert!(!dma.submit(DmaDirection::ToDevice, 0x8000_0000, 0));
        drop(dma);

        assert_eq!(mem.0[0x00 / 4] & 1, 1);
        assert_eq!(mem.0[0x18 / 4], 0x8000_0040);
        assert_eq!(mem.0[0x1C / 4], 0x1);
        assert_eq!(mem.0[0x28 / 4], 128);
        assert_eq!(mem.0[0x48 / 4], 0x8000_1000);
        assert_eq!(mem.0[0x58 / 4], 64);
    }

    #[test]
    fn running_busy_channel_rejects_submission() {
        let mut mem = Mmio([0; 0x5C / 4]);
        mem.0[0x34 / 4] = 0x20; // running, not idle, slave error
        let dma = unsafe { AxiDma::new(NonNull::from(&mut mem).cast()) };
        assert!(dma.is_busy(DmaDirection::FromDevice));
        assert!(!dma.submit(DmaDirection::FromDevice, 0x8000_0000, 4));
        assert_eq!(error_bits(dma.status(DmaDirection::FromDevice)), 0x20);
        drop(dma);
        assert_eq!(mem.0[0x58 / 4], 0);
    }
}
