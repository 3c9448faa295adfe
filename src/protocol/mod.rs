//! Protocol module - frame observation and rendering.
//!
//! This module implements the diagnostic side channel:
//! - Frame observer reassembling length-prefixed frames from chunks
//! - Renderer seam turning a complete frame into one line of text
//! - Built-in 9P2000 renderer

pub mod ninep;
mod observer;
mod render;

pub use ninep::{Fcall, NinePRenderer};
pub use observer::{Drained, FrameObserver, DEFAULT_MAX_FRAME_LEN};
pub use render::{FrameRenderer, RenderError, LENGTH_PREFIX_SIZE};
