//! Ring module - circular byte buffers backing the frame observer.
//!
//! Two variants share the same read semantics:
//! - [`RingBuffer`]: fixed capacity, reports `Overflow` when full
//! - [`GrowableRingBuffer`]: doubles its storage instead of overflowing
//!
//! [`ObserverBuffer`] lets the observer hold either one.

mod buffer;
mod growable;

pub use buffer::RingBuffer;
pub use growable::{GrowableRingBuffer, DEFAULT_INITIAL_CAPACITY};

use crate::error::Result;

/// The buffer variant owned by a frame observer.
#[derive(Debug, Clone)]
pub enum ObserverBuffer {
    Fixed(RingBuffer),
    Growable(GrowableRingBuffer),
}

impl ObserverBuffer {
    /// Fixed buffer of `capacity` bytes.
    pub fn fixed(capacity: usize) -> Result<Self> {
        Ok(Self::Fixed(RingBuffer::new(capacity)?))
    }

    /// Growable buffer at the default initial capacity.
    pub fn growable() -> Self {
        Self::Growable(GrowableRingBuffer::new())
    }

    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        match self {
            Self::Fixed(b) => b.write(src),
            Self::Growable(b) => b.write(src),
        }
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        match self {
            Self::Fixed(b) => b.read(dst),
            Self::Growable(b) => b.read(dst),
        }
    }

    pub fn readable(&self) -> usize {
        match self {
            Self::Fixed(b) => b.readable(),
            Self::Growable(b) => b.readable(),
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            Self::Fixed(b) => b.capacity(),
            Self::Growable(b) => b.capacity(),
        }
    }
}

impl ObserverBuffer {
    /// Most bytes the buffer can ever hold at once; `None` if it grows.
    pub fn fixed_capacity(&self) -> Option<usize> {
        match self {
            Self::Fixed(b) => Some(b.capacity()),
            Self::Growable(_) => None,
        }
    }
}

impl Default for ObserverBuffer {
    fn default() -> Self {
        Self::growable()
    }
}
