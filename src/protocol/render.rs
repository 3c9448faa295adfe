//! The decode-and-render seam between the observer and a wire protocol.

use thiserror::Error;

/// Size of the length prefix that starts every frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Why a complete frame could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Frame shorter than the protocol's fixed header.
    #[error("frame of {len} bytes is shorter than the {min}-byte header")]
    TooShort { len: usize, min: usize },

    /// The size field disagrees with the number of bytes handed over.
    #[error("size field says {declared} bytes but frame has {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    /// Message type byte not defined by the protocol.
    #[error("unknown message type {0}")]
    UnknownType(u8),

    /// Ran out of bytes while decoding a field.
    #[error("truncated {field}")]
    Truncated { field: &'static str },

    /// Bytes left over after the last field.
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    /// A string field is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// Renderer-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Interprets complete frames for diagnostic output.
///
/// The observer only knows that every frame starts with a 4-byte length
/// prefix covering the whole frame. The renderer decides how that prefix is
/// encoded and turns a complete frame into one line of text.
pub trait FrameRenderer: Send + Sync {
    /// Decode the total frame length (prefix included) from its prefix.
    ///
    /// Defaults to unsigned 32-bit little-endian.
    fn frame_length(&self, prefix: [u8; LENGTH_PREFIX_SIZE]) -> u32 {
        u32::from_le_bytes(prefix)
    }

    /// Render one complete frame, prefix included, as a single line.
    fn render(&self, frame: &[u8]) -> Result<String, RenderError>;
}

impl<F> FrameRenderer for F
where
    F: Fn(&[u8]) -> Result<String, RenderError> + Send + Sync,
{
    fn render(&self, frame: &[u8]) -> Result<String, RenderError> {
        self(frame)
    }
}
