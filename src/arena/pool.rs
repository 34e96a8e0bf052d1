use alloc::vec::Vec;
use alloc::vec;

use super::ArenaItem;
use crate::err::{QconvError, QconvResult};

const POOL_ALIGN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    offset: usize,
    len: usize,
}

impl Span {
    fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// A live allocation of a [`FeaturePool`]. Consumed by [`FeaturePool::free`].
#[derive(Debug, PartialEq, Eq)]
pub struct PoolBlock {
    offset: usize,
    len: usize,
    requested: usize,
}

impl PoolBlock {
    pub fn len(&self) -> usize {
        self.requested
    }

    pub fn is_empty(&self) -> bool {
        self.requested == 0
    }
}

/// First-fit allocator with free-list coalescing.
pub struct FeaturePool<'a> {
    buf: &'a mut [u8],
    first: usize,
    usable: usize,
    free: Vec<Span>,
}

impl<'a> FeaturePool<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        let skip = (buf.as_ptr() as usize).wrapping_neg() & (POOL_ALIGN - 1);
        let first = skip.min(buf.len());
        let usable = (buf.len() - first) & !(POOL_ALIGN - 1);
        let mut pool = Self {
            buf,
            first,
            usable,
            free: Vec::new(),
        };
        pool.reset();
        pool
    }

    /// Frees every block at once.
    pub fn reset(&mut self) {
        self.free = if self.usable > 0 {
            vec![Span {
                offset: self.first,
                len: self.usable,
            }]
        } else {
            Vec::new()
        };
    }

    pub fn alloc(&mut self, len: usize) -> QconvResult<PoolBlock> {
        let size = len.max(1).div_ceil(POOL_ALIGN) * POOL_ALIGN;
        let Some(idx) = self.free.iter().position(|s| s.len >= size) else {
            return Err(QconvError::ArenaExhausted {
                requested: len,
                remaining: self.largest_free(),
            });
        };
        let span = &mut self.free[idx];
        let offset = span.offset;
        span.offset += size;
        span.len -= size;
        if span.len == 0 {
            self.free.remove(idx);
        }
        self.buf[offset..offset + size].fill(0);
        Ok(PoolBlock {
            offset,
            len: size,
            requested: len,
        })
    }

    /// Returns `block` to the pool, merging it with adjacent free spans.
    pub fn free(&mut self, block: PoolBlock) -> QconvResult<()> {
        let span = Span {
            offset: block.offset,
            len: block.len,
        };
        if span.offset < self.first || span.end() > self.first + self.usable {
            return Err(QconvError::ForeignBlock);
        }
        let idx = self.free.partition_point(|s| s.offset < span.offset);
        let overlaps_prev = idx > 0 && self.free[idx - 1].end() > span.offset;
        let overlaps_next = idx < self.free.len() && span.end() > self.free[idx].offset;
        if overlaps_prev || overlaps_next {
            return Err(QconvError::ForeignBlock);
        }

        self.free.insert(idx, span);
        if idx + 1 < self.free.len() && self.free[idx].end() == self.free[idx + 1].offset {
            self.free[idx].len += self.free[idx + 1].len;
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].end() == self.free[idx].offset {
            self.free[idx - 1].len += self.free[idx].len;
            self.free.remove(idx);
        }
        Ok(())
    }

    /// Size of the largest contiguous free span, for diagnostics.
    pub fn largest_free(&self) -> usize {
        self.free.iter().map(|s| s.len).max().unwrap_or(0)
    }

    pub fn total_free(&self) -> usize {
        self.free.iter().map(|s| s.len).sum()
    }

    pub fn bytes_mut(&mut self, block: &PoolBlock) -> &mut [u8] {
        &mut self.buf[block.offset..block.offset + block.requested]
    }

    /// Typed view of a block. Trailing bytes that do not fill a whole `T` are hidden.
    pub fn slice_mut<T: ArenaItem>(&mut self, block: &PoolBlock) -> &mut [T] {
        let bytes = self.bytes_mut(block);
        // SAFETY: every `ArenaItem` accepts any bit pattern; block offsets are
        // POOL_ALIGN-aligned in absolute address, so the prefix is empty.
        let (prefix, items, _) = unsafe { bytes.align_to_mut::<T>() };
        debug_assert!(prefix.is_empty());
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_reuses_freed_hole() {
        let mut buf = [0u8; 256];
        let mut pool = FeaturePool::new(&mut buf);
        let a = pool.alloc(32).unwrap();
        let b = pool.alloc(32).unwrap();
        let a_off = a.offset;
        pool.free(a).unwrap();
        let c = pool.alloc(24).unwrap();
        assert_eq!(c.offset, a_off);
        pool.free(b).unwrap();
        pool.free(c).unwrap();
        assert_eq!(pool.free.len(), 1);
        assert_eq!(pool.largest_free(), pool.usable);
    }

    #[test]
    fn coalescing_restores_largest_block() {
        let mut buf = [0u8; 512];
        let mut pool = FeaturePool::new(&mut buf);
        let total = pool.largest_free();
        let blocks: Vec<_> = (0..4).map(|_| pool.alloc(64).unwrap()).collect();
        let mut it = blocks.into_iter();
        let (b0, b1, b2, b3) = (
            it.next().unwrap(),
            it.next().unwrap(),
            it.next().unwrap(),
            it.next().unwrap(),
        );
        pool.free(b1).unwrap();
        pool.free(b3).unwrap();
        assert_eq!(pool.largest_free(), total - 3 * 64);
        pool.free(b2).unwrap();
        assert_eq!(pool.largest_free(), total - 64);
        pool.free(b0).unwrap();
        assert_eq!(pool.largest_free(), total);
    }

    #[test]
    fn exhaustion_and_foreign_blocks_are_errors() {
        let mut buf = [0u8; 64];
        let mut pool = FeaturePool::new(&mut buf);
        assert!(matches!(
            pool.alloc(1024),
            Err(QconvError::ArenaExhausted { .. })
        ));
        let stray = PoolBlock {
            offset: 4096,
            len: 8,
            requested: 8,
        };
        assert_eq!(pool.free(stray), Err(QconvError::ForeignBlock));
    }

    #[test]
    fn typed_views_cover_requested_length() {
        let mut buf = [0u8; 128];
        let mut pool = FeaturePool::new(&mut buf);
        let block = pool.alloc(10).unwrap();
        let words = pool.slice_mut::<i16>(&block);
        assert_eq!(words.len(), 5);
        words[4] = -3;
        assert_eq!(pool.slice_mut::<i16>(&block)[4], -3);
    }
}
