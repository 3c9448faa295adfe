//! Fixed-capacity circular byte buffer.

use crate::error::{PineError, Result};

/// Circular byte buffer with a fixed capacity.
///
/// Bytes come out of [`read`](Self::read) in the order they went into
/// [`write`](Self::write). Both cursors wrap around the end of the storage;
/// `readable` is the only record of how many bytes starting at the read
/// cursor are valid.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    readable: usize,
}

impl RingBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PineError::IllegalArgument("zero capacity".to_string()));
        }
        Ok(Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            readable: 0,
        })
    }

    /// Copy as much of `src` as fits.
    ///
    /// Returns the number of bytes written. If not all of `src` fit, returns
    /// `Overflow` carrying the partial count; the bytes that did fit stay
    /// buffered.
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        let n = self.put(src);
        if n < src.len() {
            return Err(PineError::Overflow {
                transferred: n,
                requested: src.len(),
            });
        }
        Ok(n)
    }

    /// Copy buffered bytes into `dst`, oldest first.
    ///
    /// Returns the number of bytes read. If the buffer ran dry before `dst`
    /// was filled, returns `Overflow` carrying the partial count. The unfilled
    /// tail of `dst` is left untouched.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let n = self.take(dst);
        if n < dst.len() {
            return Err(PineError::Overflow {
                transferred: n,
                requested: dst.len(),
            });
        }
        Ok(n)
    }

    /// Number of bytes currently buffered.
    #[inline]
    pub fn readable(&self) -> usize {
        self.readable
    }

    /// Total number of bytes the buffer can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Free space left for writes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.readable
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.readable == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.readable == self.capacity()
    }

    /// Write what fits, in at most two contiguous copies.
    pub(super) fn put(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        let cap = self.capacity();
        let first = n.min(cap - self.write_pos);
        self.storage[self.write_pos..self.write_pos + first].copy_from_slice(&src[..first]);
        self.storage[..n - first].copy_from_slice(&src[first..n]);
        self.write_pos = (self.write_pos + n) % cap;
        self.readable += n;
        n
    }

    /// Read what is available, in at most two contiguous copies.
    pub(super) fn take(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.readable);
        let cap = self.capacity();
        let first = n.min(cap - self.read_pos);
        dst[..first].copy_from_slice(&self.storage[self.read_pos..self.read_pos + first]);
        dst[first..n].copy_from_slice(&self.storage[..n - first]);
        self.read_pos = (self.read_pos + n) % cap;
        self.readable -= n;
        n
    }

    /// Move the buffered bytes, in order, to the front of fresh storage of
    /// `new_capacity` bytes and reset the cursors.
    pub(super) fn relocate(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity >= self.readable && new_capacity > 0);
        let mut storage = vec![0u8; new_capacity].into_boxed_slice();
        let count = self.readable;
        self.take(&mut storage[..count]);
        self.storage = storage;
        self.read_pos = 0;
        self.write_pos = count % new_capacity;
        self.readable = count;
    }
}
