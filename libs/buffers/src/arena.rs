//! Bump-pointer arena over an owned byte buffer

use thiserror::Error;

/// Allocation failures from [`ArenaAllocator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// The requested block does not fit in the remaining buffer
    #[error("arena exhausted: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested (after alignment padding)
        requested: usize,
        /// Bytes still free
        available: usize,
    },

    /// Alignment was zero or not a power of two
    #[error("invalid alignment: {0}")]
    BadAlignment(usize),
}

/// Bump-pointer allocator over one owned, contiguous buffer.
///
/// Allocations are plain offsets into the buffer; there is no per-block
/// metadata and no individual free — [`reset`](ArenaAllocator::reset) reclaims
/// everything at once. The type is not thread-safe: callers serialize access,
/// typically behind the owning structure's mutex. Owning the buffer makes the
/// allocator move-only, so the backing storage can never be freed twice.
#[derive(Debug)]
pub struct ArenaAllocator {
    buf: Vec<u8>,
    offset: usize,
}

impl ArenaAllocator {
    /// Create an arena backed by `size` zeroed bytes.
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size],
            offset: 0,
        }
    }

    /// Reserve `size` bytes aligned to `align` (a power of two).
    ///
    /// Returns the offset of the new block within the buffer. The whole
    /// allocation path is one aligned bump of the offset; exhaustion is an
    /// error, never a panic.
    pub fn allocate(&mut self, size: usize, align: usize) -> Result<usize, ArenaError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(ArenaError::BadAlignment(align));
        }
        let aligned = (self.offset + align - 1) & !(align - 1);
        let end = aligned.checked_add(size).ok_or(ArenaError::OutOfMemory {
            requested: size,
            available: self.available(),
        })?;
        if end > self.buf.len() {
            return Err(ArenaError::OutOfMemory {
                requested: (aligned - self.offset) + size,
                available: self.available(),
            });
        }
        self.offset = end;
        Ok(aligned)
    }

    /// Return the bump pointer to zero, invalidating all prior offsets.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Bytes consumed so far, including alignment padding.
    pub fn used(&self) -> usize {
        self.offset
    }

    /// Bytes still free.
    pub fn available(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Total buffer size.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Read access to the backing buffer.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Write access to the backing buffer.
    ///
    /// The owner is responsible for only touching offsets it allocated.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocates_sequentially() {
        let mut arena = ArenaAllocator::new(64);
        assert_eq!(arena.allocate(8, 1).unwrap(), 0);
        assert_eq!(arena.allocate(8, 1).unwrap(), 8);
        assert_eq!(arena.used(), 16);
        assert_eq!(arena.available(), 48);
    }

    #[test]
    fn alignment_rounds_up() {
        let mut arena = ArenaAllocator::new(64);
        arena.allocate(3, 1).unwrap();
        let off = arena.allocate(8, 8).unwrap();
        assert_eq!(off % 8, 0);
        assert_eq!(off, 8);
    }

    #[test]
    fn exhaustion_is_an_error_not_a_panic() {
        let mut arena = ArenaAllocator::new(16);
        arena.allocate(16, 1).unwrap();
        let err = arena.allocate(1, 1).unwrap_err();
        assert!(matches!(err, ArenaError::OutOfMemory { available: 0, .. }));
    }

    #[test]
    fn padding_can_exhaust() {
        let mut arena = ArenaAllocator::new(10);
        arena.allocate(5, 1).unwrap();
        // 5 -> aligned 8, 8 + 4 > 10
        assert!(arena.allocate(4, 8).is_err());
    }

    #[test]
    fn reset_reclaims_everything() {
        let mut arena = ArenaAllocator::new(32);
        arena.allocate(32, 1).unwrap();
        assert_eq!(arena.available(), 0);
        arena.reset();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.allocate(32, 1).unwrap(), 0);
    }

    #[test]
    fn rejects_bad_alignment() {
        let mut arena = ArenaAllocator::new(32);
        assert_eq!(arena.allocate(4, 0), Err(ArenaError::BadAlignment(0)));
        assert_eq!(arena.allocate(4, 3), Err(ArenaError::BadAlignment(3)));
    }
}
