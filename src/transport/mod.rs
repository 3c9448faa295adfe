//! Transport module - sockets on both sides of the relay.
//!
//! Provides:
//! - `network!address` parsing for TCP and Unix-domain sockets
//! - Listener/stream wrappers over tokio's TCP and Unix types
//! - Closable endpoint handles shared by the two relay directions

mod address;
mod endpoint;
mod socket;

pub use address::Address;
pub use endpoint::Endpoint;
pub use socket::{bind_listener, dial, Listener, ReadHalf, Stream, WriteHalf};
