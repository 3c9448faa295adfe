//! Error types for pine.

use thiserror::Error;

/// Main error type for all pine operations.
#[derive(Debug, Error)]
pub enum PineError {
    /// A constructor or configuration value was rejected (e.g. zero capacity).
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// A ring buffer transfer stopped short.
    ///
    /// On write this means the buffer is full, on read that it ran out of
    /// data. `transferred` bytes were still moved and must be accounted for.
    #[error("overflow: transferred {transferred} of {requested} bytes")]
    Overflow { transferred: usize, requested: usize },

    /// The observer could not buffer a whole chunk; observed bytes were dropped.
    #[error("could only ingest {written} of {len} bytes")]
    IngestOverflow { written: usize, len: usize },

    /// A single frame could not be decoded. Assembly continues after it.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Address string is not `tcp!host!port` or `unix!/path`.
    #[error("invalid address {0:?}, expected e.g. tcp!localhost!4321 or unix!/path/file.sock")]
    InvalidAddress(String),

    /// I/O error during socket or sink operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint was closed by the other direction of the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

impl PineError {
    /// Number of bytes moved before an `Overflow`, if this is one.
    pub fn transferred(&self) -> Option<usize> {
        match self {
            PineError::Overflow { transferred, .. } => Some(*transferred),
            _ => None,
        }
    }

    /// Whether this error only affects diagnostic output, never the relay.
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            PineError::IngestOverflow { .. } | PineError::MalformedFrame(_)
        )
    }
}

/// Result type alias using PineError.
pub type Result<T> = std::result::Result<T, PineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_carries_partial_count() {
        let err = PineError::Overflow {
            transferred: 4,
            requested: 5,
        };
        assert_eq!(err.transferred(), Some(4));
        assert_eq!(err.to_string(), "overflow: transferred 4 of 5 bytes");
    }

    #[test]
    fn test_diagnostic_classification() {
        assert!(PineError::IngestOverflow { written: 1, len: 2 }.is_diagnostic());
        assert!(PineError::MalformedFrame("bad".into()).is_diagnostic());
        assert!(!PineError::ConnectionClosed.is_diagnostic());
        assert!(!PineError::IllegalArgument("zero".into()).is_diagnostic());
    }
}
