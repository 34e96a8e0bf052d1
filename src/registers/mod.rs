//! Memory-mapped register definitions for the convolution accelerator.
//!
//! The PE array is programmed through two AXI GPIO blocks: group 0 carries the
//! target input-channel count, group 1 the Q16.16 multiplier and a packed
//! control word. Data moves through the AXI DMA described in [`dma`].

use core::ptr::NonNull;

use tock_registers::{
    interfaces::{ReadWriteable, Readable, Writeable},
    register_structs,
    registers::ReadWrite,
};

pub mod consts;
pub mod dma;

use consts::MAX_ACT_START;

register_structs! {
    pub TargetRegs {
        (0x0000 => pub target_ic: ReadWrite<u32>),
        (0x0004 => @END),
    }
}

register_structs! {
    pub ControlRegs {
        (0x0000 => pub multiplier: ReadWrite<u32>),
        (0x0004 => _reserved0),
        (0x0008 => pub control: ReadWrite<u32, CONTROL::Register>),
        (0x000C => @END),
    }
}

tock_registers::register_bitfields! {u32,
    pub CONTROL [
        START_LOAD OFFSET(0) NUMBITS(1) [],
        KERNEL_SIZE OFFSET(1) NUMBITS(4) [],
        IMG_WIDTH OFFSET(5) NUMBITS(12) [],
        STRIDE OFFSET(21) NUMBITS(4) [],
        ACT_START OFFSET(25) NUMBITS(7) []
    ]
}

/// Typed view of both GPIO register groups.
pub struct ConvAccRegisters {
    target: NonNull<TargetRegs>,
    control: NonNull<ControlRegs>,
}
unsafe impl Send for ConvAccRegisters {}

impl ConvAccRegisters {
    /// # Safety
    ///
    /// Both pointers must map the corresponding GPIO register block for the
    /// lifetime of the returned object.
    pub const unsafe fn new(target: NonNull<u8>, control: NonNull<u8>) -> Self {
        Self {
            target: target.cast(),
            control: control.cast(),
        }
    }

    fn target(&self) -> &TargetRegs {
        unsafe { self.target.as_ref() }
    }

    fn ctrl(&self) -> &ControlRegs {
        unsafe { self.control.as_ref() }
    }

    pub fn set_target_ic(&self, val: u32) {
        self.target().target_ic.set(val);
    }

    pub fn set_kernel_size(&self, val: u32) {
        self.ctrl().control.modify(CONTROL::KERNEL_SIZE.val(val));
    }

    pub fn set_img_width(&self, val: u32) {
        self.ctrl().control.modify(CONTROL::IMG_WIDTH.val(val));
    }

    pub fn set_stride(&self, val: u32) {
        self.ctrl().control.modify(CONTROL::STRIDE.val(val));
    }

    /// Values above 127 are clamped.
    pub fn set_act_start(&self, val: u32) {
        self.ctrl()
            .control
            .modify(CONTROL::ACT_START.val(val.min(MAX_ACT_START)));
    }

    pub fn set_start_load(&self, on: bool) {
        let field = if on {
            CONTROL::START_LOAD::SET
        } else {
            CONTROL::START_LOAD::CLEAR
        };
        self.ctrl().control.modify(field);
    }

    pub fn set_multiplier(&self, val: u32) {
        self.ctrl().multiplier.set(val);
    }

    pub fn control_word(&self) -> u32 {
        self.ctrl().control.get()
    }
}
