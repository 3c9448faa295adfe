//! # pine
//!
//! Transparent relay between two stream sockets (TCP or Unix-domain) that
//! prints the length-prefixed frames passing through it, 9P2000 by default.
//!
//! Relayed bytes are never modified or held back. Each direction of each
//! connection feeds a copy of its traffic to its own frame observer, which
//! reassembles frames across arbitrary read boundaries and renders each one
//! as a line on stdout. Observation failures are only logged.
//!
//! ## Architecture
//!
//! - **Ring** ([`ring`]): fixed and growable circular byte buffers
//! - **Protocol** ([`protocol`]): frame observer and the 9P2000 renderer
//! - **Relay** ([`relay`]): one task per direction, mutual teardown
//! - **Output** ([`output`]): writer task printing rendered lines
//! - **Transport** ([`transport`]): addresses, listeners, dialing
//!
//! ## Example
//!
//! ```ignore
//! use pine::Proxy;
//!
//! #[tokio::main]
//! async fn main() {
//!     let proxy = Proxy::builder(
//!         "tcp!localhost!5640".parse().unwrap(),
//!         "tcp!fileserver!564".parse().unwrap(),
//!     )
//!     .bind()
//!     .await
//!     .unwrap();
//!
//!     proxy.run().await;
//! }
//! ```

pub mod config;
pub mod error;
pub mod output;
pub mod protocol;
pub mod relay;
pub mod ring;
pub mod transport;

mod proxy;

pub use config::{BufferMode, ObserverConfig, ProxyConfig};
pub use output::{spawn_line_writer, LineSender};
pub use error::PineError;
pub use protocol::{FrameObserver, FrameRenderer, NinePRenderer};
pub use proxy::{Proxy, ProxyBuilder};
pub use transport::Address;
