//! Frame observer: reassembles length-prefixed frames from observed chunks.
//!
//! Chunks of any size are pushed in with [`FrameObserver::ingest`] and
//! buffered in a ring buffer. [`FrameObserver::drain_frames`] then runs a
//! small state machine over the buffered bytes:
//! - `Unknown`: need 4 bytes to learn the next frame's length
//! - `Known(len)`: header read, need `len - 4` more bytes for the body
//! - `Discarding(n)`: frame too large to keep, skip its next `n` bytes
//!
//! Every complete frame is handed to a [`FrameRenderer`] and the rendered
//! line is written to the sink. Nothing here ever touches relayed bytes.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pine::protocol::{FrameObserver, NinePRenderer};
//!
//! let mut observer = FrameObserver::new(Arc::new(NinePRenderer));
//!
//! // Data arrives in chunks from the socket
//! observer.ingest(&chunk)?;
//! observer.drain_frames(&mut std::io::stdout())?;
//! ```

use std::io::Write;
use std::sync::Arc;

use super::render::{FrameRenderer, LENGTH_PREFIX_SIZE};
use crate::config::ObserverConfig;
use crate::error::{PineError, Result};
use crate::ring::ObserverBuffer;

/// Largest frame the observer assembles unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Scratch size used when skipping oversized frames.
const DISCARD_CHUNK: usize = 256;

/// Length of the frame currently being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameLength {
    /// Fewer than 4 header bytes seen for the current frame.
    Unknown,
    /// Header consumed; total frame length, header included.
    Known(usize),
    /// Oversized frame; this many body bytes remain to be skipped.
    Discarding(usize),
}

/// What one [`FrameObserver::drain_frames`] call produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Drained {
    /// Frames rendered and written to the sink.
    pub rendered: usize,
    /// Frames that could not be rendered or were skipped.
    pub malformed: usize,
}

impl Drained {
    /// Total frames whose bytes were consumed.
    pub fn frames(&self) -> usize {
        self.rendered + self.malformed
    }
}

/// Reassembles length-prefixed frames from arbitrarily split chunks.
pub struct FrameObserver {
    buffer: ObserverBuffer,
    pending: FrameLength,
    /// Reused across frames; grows to the largest frame seen.
    frame: Vec<u8>,
    renderer: Arc<dyn FrameRenderer>,
    max_frame_len: usize,
}

impl FrameObserver {
    /// Observer backed by a growable buffer and the default frame limit.
    pub fn new(renderer: Arc<dyn FrameRenderer>) -> Self {
        Self::with_buffer(ObserverBuffer::growable(), renderer)
    }

    /// Observer over a specific buffer variant.
    pub fn with_buffer(buffer: ObserverBuffer, renderer: Arc<dyn FrameRenderer>) -> Self {
        Self {
            buffer,
            pending: FrameLength::Unknown,
            frame: vec![0u8; LENGTH_PREFIX_SIZE],
            renderer,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Observer built from configuration.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` for a zero fixed capacity or frame limit.
    pub fn from_config(config: &ObserverConfig, renderer: Arc<dyn FrameRenderer>) -> Result<Self> {
        config.validate()?;
        let buffer = config.buffer.build()?;
        Ok(Self::with_buffer(buffer, renderer).with_max_frame_len(config.max_frame_len))
    }

    /// Set the largest declared frame length that will be assembled.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Buffer `chunk` for frame assembly.
    ///
    /// # Errors
    ///
    /// Returns `IngestOverflow` if a fixed buffer could not take the whole
    /// chunk. The bytes that fit stay buffered; the rest are lost to
    /// observation only.
    pub fn ingest(&mut self, chunk: &[u8]) -> Result<()> {
        match self.buffer.write(chunk) {
            Ok(_) => Ok(()),
            Err(PineError::Overflow { transferred, .. }) => Err(PineError::IngestOverflow {
                written: transferred,
                len: chunk.len(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Emit every frame that is complete in the buffer, in arrival order.
    ///
    /// Each rendered frame becomes one newline-terminated line on `sink`.
    /// Frames the renderer rejects are logged and skipped. Never waits for
    /// more data; partial frames stay buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns `Io` if writing to `sink` fails. The failed frame's bytes are
    /// already consumed, so later calls carry on with the next frame.
    pub fn drain_frames<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<Drained> {
        let mut drained = Drained::default();

        loop {
            match self.pending {
                FrameLength::Unknown => {
                    if self.buffer.readable() < LENGTH_PREFIX_SIZE {
                        break;
                    }
                    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
                    self.read_buffered(&mut prefix)?;
                    let len = self.renderer.frame_length(prefix) as usize;

                    if let Err(e) = self.check_length(len) {
                        tracing::warn!(cause = %e, len, "Skipping frame");
                        drained.malformed += 1;
                        self.pending = match len.checked_sub(LENGTH_PREFIX_SIZE) {
                            Some(body) if body > 0 => FrameLength::Discarding(body),
                            _ => FrameLength::Unknown,
                        };
                        continue;
                    }

                    if self.frame.len() < len {
                        self.frame.resize(len, 0);
                    }
                    self.frame[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix);
                    self.pending = FrameLength::Known(len);
                }

                FrameLength::Known(len) => {
                    if self.buffer.readable() + LENGTH_PREFIX_SIZE < len {
                        break;
                    }
                    let n = self.buffer.read(&mut self.frame[LENGTH_PREFIX_SIZE..len])?;
                    debug_assert_eq!(n, len - LENGTH_PREFIX_SIZE);
                    self.pending = FrameLength::Unknown;

                    match self.render_frame(len) {
                        Ok(mut line) => {
                            line.push('\n');
                            sink.write_all(line.as_bytes())?;
                            drained.rendered += 1;
                        }
                        Err(e) => {
                            tracing::warn!(cause = %e, len, "Could not unpack frame");
                            drained.malformed += 1;
                        }
                    }
                }

                FrameLength::Discarding(remaining) => {
                    let skip = remaining.min(self.buffer.readable());
                    if skip == 0 {
                        break;
                    }
                    self.discard(skip)?;
                    self.pending = match remaining - skip {
                        0 => FrameLength::Unknown,
                        left => FrameLength::Discarding(left),
                    };
                }
            }
        }

        Ok(drained)
    }

    /// Bytes ingested but not yet consumed by frame assembly.
    pub fn buffered(&self) -> usize {
        self.buffer.readable()
    }

    /// Reject declared lengths this observer can never assemble.
    ///
    /// Shorter than the prefix itself, above the configured maximum, or a
    /// body larger than a fixed buffer could ever hold.
    fn check_length(&self, len: usize) -> Result<()> {
        if len < LENGTH_PREFIX_SIZE {
            return Err(PineError::MalformedFrame(format!(
                "length {len} shorter than its {LENGTH_PREFIX_SIZE} byte prefix"
            )));
        }
        if len > self.max_frame_len {
            return Err(PineError::MalformedFrame(format!(
                "length {len} exceeds maximum {}",
                self.max_frame_len
            )));
        }
        if let Some(capacity) = self.buffer.fixed_capacity() {
            if len - LENGTH_PREFIX_SIZE > capacity {
                return Err(PineError::MalformedFrame(format!(
                    "length {len} does not fit a {capacity} byte buffer"
                )));
            }
        }
        Ok(())
    }

    /// Render the assembled frame in `self.frame[..len]`.
    fn render_frame(&self, len: usize) -> Result<String> {
        self.renderer
            .render(&self.frame[..len])
            .map_err(|e| PineError::MalformedFrame(e.to_string()))
    }

    /// Read exactly `dst.len()` bytes the caller knows are buffered.
    fn read_buffered(&mut self, dst: &mut [u8]) -> Result<()> {
        let n = self.buffer.read(dst)?;
        debug_assert_eq!(n, dst.len());
        Ok(())
    }

    fn discard(&mut self, mut count: usize) -> Result<()> {
        let mut scratch = [0u8; DISCARD_CHUNK];
        while count > 0 {
            let n = count.min(DISCARD_CHUNK);
            self.read_buffered(&mut scratch[..n])?;
            count -= n;
        }
        Ok(())
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.pending {
            FrameLength::Unknown => "Unknown",
            FrameLength::Known(_) => "Known",
            FrameLength::Discarding(_) => "Discarding",
        }
    }

    #[cfg(test)]
    fn frame_storage_len(&self) -> usize {
        self.frame.len()
    }
}

impl std::fmt::Debug for FrameObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameObserver")
            .field("buffer", &self.buffer)
            .field("pending", &self.pending)
            .field("frame_storage", &self.frame.len())
            .field("max_frame_len", &self.max_frame_len)
            .finish()
    }
}
