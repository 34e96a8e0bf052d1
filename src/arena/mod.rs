//! Memory regions for per-layer temporaries.
//!
//! One byte region is used through exactly one of two disciplines at a time:
//! a bump [`ScratchArena`] (embedded build, O(1), reset once per inference) or a
//! first-fit [`FeaturePool`] with explicit free (host/test build). Both are
//! obtained from an [`ArenaRegion`] through an exclusive borrow, so the borrow
//! checker keeps them from ever overlapping.

mod pool;
mod scratch;

pub use pool::{FeaturePool, PoolBlock};
pub use scratch::{Checkpoint, ScratchArena};

/// Minimum alignment of every allocation handed out by either discipline.
pub const MIN_ALIGN: usize = 4;

mod sealed {
    pub trait Sealed {}
}

/// Plain integer and float element types that can live in an arena.
///
/// Every bit pattern of these types is valid and all-zero bytes is their zero.
pub trait ArenaItem: Copy + sealed::Sealed {}

macro_rules! arena_items {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl ArenaItem for $t {}
        )*
    };
}

arena_items!(u8, i8, u16, i16, u32, i32, f32);

/// The backing region of the feature memory.
pub struct ArenaRegion<'a> {
    buf: &'a mut [u8],
}

impl<'a> ArenaRegion<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    /// Wraps a fixed physical window of the board's memory map.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be mapped, writable, and not used by anything else
    /// for the rest of the program.
    #[cfg(feature = "bare-metal")]
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> ArenaRegion<'static> {
        ArenaRegion {
            buf: unsafe { core::slice::from_raw_parts_mut(base, len) },
        }
    }

    /// The feature pool window of the board's DDR map.
    ///
    /// # Safety
    ///
    /// Same contract as [`from_raw`](Self::from_raw) for the configured window.
    #[cfg(feature = "bare-metal")]
    pub unsafe fn from_platform(platform: &crate::config::PlatformConfig) -> ArenaRegion<'static> {
        unsafe {
            ArenaRegion::from_raw(
                platform.feature_pool_base as *mut u8,
                platform.feature_pool_size,
            )
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Starts a bump-allocation session over the whole region.
    pub fn scratch(&mut self) -> ScratchArena<'_> {
        ScratchArena::new(self.buf)
    }

    /// Starts a first-fit session over the whole region.
    pub fn pool(&mut self) -> FeaturePool<'_> {
        FeaturePool::new(self.buf)
    }
}
