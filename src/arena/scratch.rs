use core::{cell::Cell, marker::PhantomData, mem, ptr::NonNull, slice};

use super::{ArenaItem, MIN_ALIGN};
use crate::err::{QconvError, QconvResult};

/// Saved cursor position, see [`ScratchArena::rewind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Bump allocator over a borrowed byte region.
///
/// Allocation takes `&self` and hands out disjoint `&mut` slices tied to that
/// borrow; [`reset`](Self::reset) and [`rewind`](Self::rewind) take `&mut self`, so
/// they cannot run while any slice is still alive. Nothing is ever freed
/// individually.
pub struct ScratchArena<'a> {
    base: NonNull<u8>,
    capacity: usize,
    cursor: Cell<usize>,
    _region: PhantomData<&'a mut [u8]>,
}

impl<'a> ScratchArena<'a> {
    pub fn new(region: &'a mut [u8]) -> Self {
        Self {
            // SAFETY: slice pointers are never null.
            base: unsafe { NonNull::new_unchecked(region.as_mut_ptr()) },
            capacity: region.len(),
            cursor: Cell::new(0),
            _region: PhantomData,
        }
    }

    /// Invalidates every previous allocation.
    pub fn reset(&mut self) {
        self.cursor.set(0);
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.cursor.get())
    }

    /// Releases everything allocated after `checkpoint`.
    pub fn rewind(&mut self, checkpoint: Checkpoint) {
        if checkpoint.0 <= self.cursor.get() {
            self.cursor.set(checkpoint.0);
        }
    }

    /// Raw bytes, aligned to at least [`MIN_ALIGN`].
    pub fn alloc_bytes(&self, len: usize) -> QconvResult<&mut [u8]> {
        self.alloc_slice::<u8>(len)
    }

    /// A zeroed slice of `len` elements, aligned to at least [`MIN_ALIGN`].
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice<T: ArenaItem>(&self, len: usize) -> QconvResult<&mut [T]> {
        let align = mem::align_of::<T>().max(MIN_ALIGN);
        let bytes = len
            .checked_mul(mem::size_of::<T>())
            .ok_or(QconvError::ArenaExhausted {
                requested: usize::MAX,
                remaining: self.remaining(),
            })?;
        let start = self.reserve(bytes, align)?;

        // SAFETY: `start..start + bytes` lies inside the region, is aligned for `T`,
        // and was never handed out before because the cursor only moves forward
        // between `&mut self` resets. Zero bytes are a valid `T` (see `ArenaItem`).
        unsafe {
            let ptr = self.base.as_ptr().add(start);
            ptr.write_bytes(0, bytes);
            Ok(slice::from_raw_parts_mut(ptr.cast::<T>(), len))
        }
    }

    fn reserve(&self, bytes: usize, align: usize) -> QconvResult<usize> {
        let cursor = self.cursor.get();
        let addr = self.base.as_ptr() as usize + cursor;
        let pad = addr.wrapping_neg() & (align - 1);
        let exhausted = QconvError::ArenaExhausted {
            requested: bytes,
            remaining: self.capacity - cursor,
        };
        let start = cursor.checked_add(pad).ok_or(exhausted)?;
        let end = start.checked_add(bytes).ok_or(exhausted)?;
        if end > self.capacity {
            return Err(exhausted);
        }
        self.cursor.set(end);
        Ok(start)
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.cursor.get()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.cursor.get()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
