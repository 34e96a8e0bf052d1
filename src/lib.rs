//! Fixed-point (Q6.10) 2-D convolution for a detector inference pipeline.
//!
//! Activations are signed 16-bit with 10 fractional bits, weights are int8
//! with one scale per layer. A layer runs either on a 32-lane PE array behind
//! AXI GPIO and AXI DMA ([`accel`]) or on the tiled software kernel
//! ([`kernel`]); [`ConvDispatcher`] picks per layer and falls back to software
//! whenever the accelerator refuses. Temporaries come from caller-owned
//! regions ([`arena`]), so nothing here allocates on the hot path.

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod accel;
pub mod arena;
pub mod kernel;
pub mod registers;

mod activation;
mod backend;
mod config;
mod err;
mod fixed;
mod osal;
mod pack;
mod store;
mod tensor;

pub use accel::{AccelPort, AxiPort, ConvAccelerator, HostPort, RunConfig};
pub use activation::*;
pub use arena::{ArenaRegion, ScratchArena};
pub use backend::*;
pub use config::*;
pub use err::*;
pub use fixed::*;
pub use kernel::{TilePolicy, conv2d_f32, conv2d_q610, conv2d_q610_with};
pub use osal::*;
pub use pack::*;
pub use store::*;
pub use tensor::*;
