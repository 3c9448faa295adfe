//! Circular byte buffer that doubles its storage instead of overflowing.

use super::RingBuffer;
use crate::error::Result;

/// Initial capacity used by [`GrowableRingBuffer::new`].
pub const DEFAULT_INITIAL_CAPACITY: usize = 4;

/// Circular byte buffer whose writes always succeed.
///
/// When a write finds the buffer full, the storage is doubled and the
/// buffered bytes are moved to the front of the new storage. Capacity only
/// ever grows.
#[derive(Debug, Clone)]
pub struct GrowableRingBuffer {
    inner: RingBuffer,
}

impl GrowableRingBuffer {
    /// Create a buffer starting at [`DEFAULT_INITIAL_CAPACITY`].
    pub fn new() -> Self {
        Self {
            inner: RingBuffer::new(DEFAULT_INITIAL_CAPACITY)
                .unwrap_or_else(|_| unreachable!("default capacity is non-zero")),
        }
    }

    /// Create a buffer starting at `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            inner: RingBuffer::new(capacity)?,
        })
    }

    /// Append all of `src`, growing as many times as needed.
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < src.len() {
            if self.inner.is_full() {
                self.grow();
            }
            written += self.inner.put(&src[written..]);
        }
        Ok(written)
    }

    /// Same contract as [`RingBuffer::read`].
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.inner.read(dst)
    }

    /// Double the storage, keeping buffered bytes in order.
    pub fn grow(&mut self) {
        let doubled = self.inner.capacity() * 2;
        tracing::trace!(
            from = self.inner.capacity(),
            to = doubled,
            "growing ring buffer"
        );
        self.inner.relocate(doubled);
    }

    #[inline]
    pub fn readable(&self) -> usize {
        self.inner.readable()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for GrowableRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
