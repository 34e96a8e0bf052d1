//! The register and DMA seam of the accelerator.

use core::ptr::NonNull;

use crate::{
    config::AccelConfig,
    err::{AccelError, Transfer},
    osal::{DmaSyncDirection, Osal, WaitStrategy},
    registers::{
        ConvAccRegisters,
        dma::{AxiDma, DmaDirection, error_bits},
    },
};

/// Per-run register image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunConfig {
    pub kernel_size: u32,
    pub target_ic: u32,
    pub img_width: u32,
    pub stride: u32,
    pub act_start: u32,
    pub multiplier: u32,
}

/// What the driver needs from the hardware.
///
/// Every transfer is synchronous: `send` and `receive` return once the DMA
/// engine reports completion, or with an error.
pub trait AccelPort {
    /// Whether this port can execute a layer at all.
    const SUPPORTED: bool;

    fn is_ready(&self) -> bool;

    fn open(&mut self) -> Result<(), AccelError>;

    fn close(&mut self);

    fn configure(&mut self, run: &RunConfig);

    fn set_start_load(&mut self, on: bool);

    fn send(&mut self, kind: Transfer, words: &[u32]) -> Result<(), AccelError>;

    fn receive(&mut self, out: &mut [u32]) -> Result<(), AccelError>;
}

/// Port of builds without an accelerator. Every layer reports
/// [`AccelError::Unsupported`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPort;

impl AccelPort for HostPort {
    const SUPPORTED: bool = false;

    fn is_ready(&self) -> bool {
        false
    }

    fn open(&mut self) -> Result<(), AccelError> {
        Err(AccelError::Unsupported)
    }

    fn close(&mut self) {}

    fn configure(&mut self, _run: &RunConfig) {}

    fn set_start_load(&mut self, _on: bool) {}

    fn send(&mut self, _kind: Transfer, _words: &[u32]) -> Result<(), AccelError> {
        Err(AccelError::Unsupported)
    }

    fn receive(&mut self, _out: &mut [u32]) -> Result<(), AccelError> {
        Err(AccelError::Unsupported)
    }
}

/// The PE array behind AXI GPIO and AXI DMA.
pub struct AxiPort<O, W> {
    regs: ConvAccRegisters,
    dma: AxiDma,
    osal: O,
    wait: W,
    config: AccelConfig,
    ready: bool,
}

impl<O: Osal, W: WaitStrategy> AxiPort<O, W> {
    pub fn new(regs: ConvAccRegisters, dma: AxiDma, config: AccelConfig, osal: O, wait: W) -> Self {
        Self {
            regs,
            dma,
            osal,
            wait,
            config,
            ready: false,
        }
    }

    /// Binds the port to the physical addresses of `config`.
    ///
    /// # Safety
    ///
    /// The addresses must be identity-mapped device memory owned by this port.
    #[cfg(feature = "bare-metal")]
    pub unsafe fn from_config(config: AccelConfig, osal: O, wait: W) -> Option<Self> {
        let target = NonNull::new(config.gpio_target_base as *mut u8)?;
        let control = NonNull::new(config.gpio_control_base as *mut u8)?;
        let dma = NonNull::new(config.dma_base as *mut u8)?;
        Some(unsafe {
            Self::new(
                ConvAccRegisters::new(target, control),
                AxiDma::new(dma),
                config,
                osal,
                wait,
            )
        })
    }

    /// Binds the port to register blocks at arbitrary addresses.
    ///
    /// # Safety
    ///
    /// Same contract as [`ConvAccRegisters::new`] and [`AxiDma::new`].
    pub unsafe fn from_raw(
        target: NonNull<u8>,
        control: NonNull<u8>,
        dma: NonNull<u8>,
        config: AccelConfig,
        osal: O,
        wait: W,
    ) -> Self {
        unsafe {
            Self::new(
                ConvAccRegisters::new(target, control),
                AxiDma::new(dma),
                config,
                osal,
                wait,
            )
        }
    }

    fn byte_len(&self, words: usize) -> Option<u32> {
        let bytes = u32::try_from(words.checked_mul(4)?).ok()?;
        (bytes <= self.config.dma_max_transfer).then_some(bytes)
    }
}

impl<O: Osal, W: WaitStrategy> AccelPort for AxiPort<O, W> {
    const SUPPORTED: bool = true;

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn open(&mut self) -> Result<(), AccelError> {
        self.dma.reset();
        let dma = &self.dma;
        self.wait
            .wait_while(self.config.tx_poll_limit, &mut || dma.reset_pending())
            .map_err(|polls| {
                error!("AXI DMA reset did not complete after {polls} polls");
                AccelError::DmaNotReady
            })?;
        self.dma.disable_interrupts();
        self.ready = true;
        debug!("accelerator DMA ready");
        Ok(())
    }

    fn close(&mut self) {
        self.ready = false;
    }

    fn configure(&mut self, run: &RunConfig) {
        self.regs.set_target_ic(run.target_ic);
        self.regs.set_kernel_size(run.kernel_size);
        self.regs.set_img_width(run.img_width);
        self.regs.set_stride(run.stride);
        self.regs.set_act_start(run.act_start);
        self.regs.set_multiplier(run.multiplier);
    }

    fn set_start_load(&mut self, on: bool) {
        self.regs.set_start_load(on);
    }

    fn send(&mut self, kind: Transfer, words: &[u32]) -> Result<(), AccelError> {
        let len = self.byte_len(words.len()).ok_or(AccelError::Submit(kind))?;
        let virt = words.as_ptr() as usize;
        self.osal
            .dma_sync(virt, len as usize, DmaSyncDirection::ToDevice);
        if !self
            .dma
            .submit(DmaDirection::ToDevice, self.osal.dma_addr(virt), len)
        {
            return Err(AccelError::Submit(kind));
        }
        let dma = &self.dma;
        self.wait
            .wait_while(self.config.tx_poll_limit, &mut || {
                dma.is_busy(DmaDirection::ToDevice)
            })
            .map_err(|polls| {
                error!("{kind:?} transfer timed out after {polls} polls");
                AccelError::TxTimeout(polls)
            })
    }

    fn receive(&mut self, out: &mut [u32]) -> Result<(), AccelError> {
        let len = self
            .byte_len(out.len())
            .ok_or(AccelError::Submit(Transfer::Output))?;
        let virt = out.as_mut_ptr() as usize;
        if !self
            .dma
            .submit(DmaDirection::FromDevice, self.osal.dma_addr(virt), len)
        {
            return Err(AccelError::Submit(Transfer::Output));
        }
        let dma = &self.dma;
        if let Err(polls) = self.wait.wait_while(self.config.rx_poll_limit, &mut || {
            dma.is_busy(DmaDirection::FromDevice)
        }) {
            let sr = self.dma.status(DmaDirection::FromDevice);
            error!(
                "DMA receive timed out after {polls} polls: SR 0x{:08x} (err bits 0x{:03x})",
                sr.get(),
                error_bits(sr)
            );
            return Err(AccelError::RxTimeout(polls));
        }
        self.osal
            .dma_sync(virt, len as usize, DmaSyncDirection::FromDevice);
        Ok(())
    }
}
