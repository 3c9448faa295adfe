//! Proxy builder and accept loop.
//!
//! The [`ProxyBuilder`] provides a fluent API for configuring observation and
//! binding the listener. The [`Proxy`] then runs the accept loop:
//! 1. Accept a local connection
//! 2. Dial the remote endpoint
//! 3. Spawn the two relay directions
//!
//! # Example
//!
//! ```ignore
//! use pine::Proxy;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let proxy = Proxy::builder(
//!         "tcp!localhost!5640".parse()?,
//!         "unix!/tmp/ns/factotum".parse()?,
//!     )
//!     .msize(8192)
//!     .bind()
//!     .await?;
//!
//!     proxy.run().await;
//!     Ok(())
//! }
//! ```

use std::io::Write;
use std::sync::Arc;

use crate::config::{BufferMode, ProxyConfig};
use crate::error::Result;
use crate::output::{spawn_line_writer, DEFAULT_LINE_CAPACITY};
use crate::protocol::{FrameRenderer, NinePRenderer};
use crate::relay::{spawn_connection, Observation, OutputFactory};
use crate::transport::{bind_listener, dial, Address, Listener};

/// Builder for configuring and binding a proxy.
pub struct ProxyBuilder {
    config: ProxyConfig,
    renderer: Arc<dyn FrameRenderer>,
    output: Option<OutputFactory>,
}

impl ProxyBuilder {
    /// Proxy from `local` to `remote`, printing 9P2000 frames to stdout.
    pub fn new(local: Address, remote: Address) -> Self {
        Self::from_config(ProxyConfig::new(local, remote))
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ProxyConfig) -> Self {
        Self {
            config,
            renderer: Arc::new(NinePRenderer),
            output: None,
        }
    }

    /// Use fixed observer buffers of `capacity` bytes.
    ///
    /// Observed bytes that do not fit are dropped from the log (not from the
    /// relay). Default: growable buffers.
    pub fn msize(mut self, capacity: usize) -> Self {
        self.config.observer.buffer = BufferMode::Fixed(capacity);
        self
    }

    /// Largest frame that will be assembled and rendered.
    ///
    /// Default: 16 MiB
    pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.config.observer.max_frame_len = max_frame_len;
        self
    }

    /// Render frames with something other than the 9P2000 renderer.
    pub fn renderer(mut self, renderer: Arc<dyn FrameRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Send rendered frames somewhere other than stdout.
    ///
    /// `make` is called once per relay direction, from inside the relay
    /// task, so the writer it returns must not block.
    pub fn output<F>(mut self, make: F) -> Self
    where
        F: Fn() -> Box<dyn Write + Send> + Send + Sync + 'static,
    {
        self.output = Some(Arc::new(make));
        self
    }

    /// Validate the configuration and bind the local listener.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for an unusable observer configuration, `Io` if the
    /// listener cannot be bound (after the stale Unix socket retry).
    pub async fn bind(self) -> Result<Proxy> {
        self.config.validate()?;
        let listener = bind_listener(&self.config.local).await?;
        let output = self.output.unwrap_or_else(stdout_output);

        Ok(Proxy {
            listener,
            remote: self.config.remote,
            observation: Observation::new(self.config.observer, self.renderer, output),
        })
    }
}

/// Rendered lines go through the writer task to stdout.
fn stdout_output() -> OutputFactory {
    let (sender, task) = spawn_line_writer(tokio::io::stdout(), DEFAULT_LINE_CAPACITY);
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(cause = %e, "Could not write rendered frames"),
            Err(e) => tracing::error!(cause = %e, "Output writer task failed"),
        }
    });
    Arc::new(move || Box::new(sender.clone()) as Box<dyn Write + Send>)
}

/// A bound proxy, ready to accept connections.
pub struct Proxy {
    listener: Listener,
    remote: Address,
    observation: Observation,
}

impl Proxy {
    /// Create a new proxy builder.
    pub fn builder(local: Address, remote: Address) -> ProxyBuilder {
        ProxyBuilder::new(local, remote)
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<Address> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    ///
    /// Accept and dial failures are logged and the loop keeps going; a
    /// failed dial drops the accepted local connection.
    pub async fn run(self) {
        loop {
            let (local, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(cause = %e, "Could not accept");
                    continue;
                }
            };

            let remote = match dial(&self.remote).await {
                Ok(remote) => remote,
                Err(e) => {
                    drop(local);
                    tracing::error!(%peer, remote = %self.remote, cause = %e, "Could not connect");
                    continue;
                }
            };

            tracing::info!(%peer, remote = %self.remote, "Relaying connection");
            let handle = spawn_connection(
                local,
                peer.clone(),
                remote,
                self.remote.to_string(),
                &self.observation,
            );
            tokio::spawn(async move {
                match handle.join().await {
                    Ok((to_remote, to_local)) => tracing::info!(
                        %peer,
                        sent = to_remote.bytes,
                        received = to_local.bytes,
                        local_end = ?to_remote.termination,
                        remote_end = ?to_local.termination,
                        "Connection closed"
                    ),
                    Err(e) => tracing::error!(%peer, cause = %e, "Relay task failed"),
                }
            });
        }
    }
}
