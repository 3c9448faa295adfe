//! Runtime configuration for the proxy and its observers.
//!
//! The binary fills these from command-line flags; the library never reads
//! argv or the environment itself.

use crate::error::{PineError, Result};
use crate::protocol::DEFAULT_MAX_FRAME_LEN;
use crate::ring::ObserverBuffer;
use crate::transport::Address;

/// Which ring buffer variant each observer gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    /// Fixed capacity in bytes. Chunks that do not fit are dropped from
    /// observation and reported as `IngestOverflow`.
    Fixed(usize),
    /// Starts small and doubles on demand; never drops observed bytes.
    #[default]
    Growable,
}

impl BufferMode {
    pub fn build(&self) -> Result<ObserverBuffer> {
        match self {
            BufferMode::Fixed(capacity) => ObserverBuffer::fixed(*capacity),
            BufferMode::Growable => Ok(ObserverBuffer::growable()),
        }
    }
}

/// Settings shared by every frame observer the proxy creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverConfig {
    pub buffer: BufferMode,
    /// Largest declared frame length that will be assembled and rendered.
    pub max_frame_len: usize,
}

impl ObserverConfig {
    /// Check the settings before any connection is accepted.
    pub fn validate(&self) -> Result<()> {
        if self.buffer == BufferMode::Fixed(0) {
            return Err(PineError::IllegalArgument(
                "observer buffer capacity must be positive".to_string(),
            ));
        }
        if self.max_frame_len == 0 {
            return Err(PineError::IllegalArgument(
                "maximum frame length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            buffer: BufferMode::Growable,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Where to listen, where to forward, and how to observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub local: Address,
    pub remote: Address,
    pub observer: ObserverConfig,
}

impl ProxyConfig {
    pub fn new(local: Address, remote: Address) -> Self {
        Self {
            local,
            remote,
            observer: ObserverConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.observer.validate()
    }
}
