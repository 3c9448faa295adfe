//! Close handles shared by the two directions of one connection.
//!
//! Each side of a relayed connection (local and remote) gets one
//! [`Endpoint`]. Both relay directions hold both handles. A direction that
//! stops for any reason closes both; the other direction sees the close while
//! blocked in its own read or write and stops without reporting an error.

use tokio::sync::watch;

/// Idempotent, awaitable "this endpoint is closed" flag.
#[derive(Debug)]
pub struct Endpoint {
    name: &'static str,
    addr: String,
    closed: watch::Sender<bool>,
}

impl Endpoint {
    pub fn new(name: &'static str, addr: impl Into<String>) -> Self {
        Self {
            name,
            addr: addr.into(),
            closed: watch::Sender::new(false),
        }
    }

    /// Role of the endpoint in the connection ("local" or "remote").
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Printable address of the socket behind the endpoint.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Mark closed. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called, immediately if
    /// it already was.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so this cannot observe a dropped channel.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
