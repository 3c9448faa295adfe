//! Listening, accepting and dialing over TCP or Unix-domain sockets.
//!
//! - [`bind_listener`]: listen, recovering once from a stale Unix socket file
//! - [`Listener::accept`]: next local connection
//! - [`dial`]: connect to the remote endpoint
//!
//! # Example
//!
//! ```ignore
//! use pine::transport::{bind_listener, dial, Address};
//!
//! let listener = bind_listener(&"unix!/tmp/pine.sock".parse()?).await?;
//! let (local, peer) = listener.accept().await?;
//! let remote = dial(&"tcp!localhost!5640".parse()?).await?;
//! ```

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{tcp, TcpListener, TcpStream};

use super::Address;
use crate::error::{PineError, Result};

#[cfg(unix)]
use std::path::Path;
#[cfg(unix)]
use tokio::net::{unix, UnixListener, UnixStream};

/// A connected TCP or Unix-domain stream.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Human-readable peer address for logs.
    pub fn peer(&self) -> String {
        match self {
            Stream::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| format!("tcp!{}!{}", addr.ip(), addr.port()))
                .unwrap_or_else(|_| "tcp!?".to_string()),
            #[cfg(unix)]
            Stream::Unix(stream) => stream
                .peer_addr()
                .ok()
                .and_then(|addr| addr.as_pathname().map(|p| format!("unix!{}", p.display())))
                .unwrap_or_else(|| "unix!@".to_string()),
        }
    }

    /// Split into independently owned read and write halves.
    ///
    /// Shutting down the write half only closes the sending direction.
    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        match self {
            Stream::Tcp(stream) => {
                let (rd, wr) = stream.into_split();
                (ReadHalf::Tcp(rd), WriteHalf::Tcp(wr))
            }
            #[cfg(unix)]
            Stream::Unix(stream) => {
                let (rd, wr) = stream.into_split();
                (ReadHalf::Unix(rd), WriteHalf::Unix(wr))
            }
        }
    }
}

/// Owned read half of a [`Stream`].
#[derive(Debug)]
pub enum ReadHalf {
    Tcp(tcp::OwnedReadHalf),
    #[cfg(unix)]
    Unix(unix::OwnedReadHalf),
}

/// Owned write half of a [`Stream`].
#[derive(Debug)]
pub enum WriteHalf {
    Tcp(tcp::OwnedWriteHalf),
    #[cfg(unix)]
    Unix(unix::OwnedWriteHalf),
}

impl AsyncRead for ReadHalf {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ReadHalf::Tcp(half) => Pin::new(half).poll_read(cx, buf),
            #[cfg(unix)]
            ReadHalf::Unix(half) => Pin::new(half).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WriteHalf {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            WriteHalf::Tcp(half) => Pin::new(half).poll_write(cx, buf),
            #[cfg(unix)]
            WriteHalf::Unix(half) => Pin::new(half).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WriteHalf::Tcp(half) => Pin::new(half).poll_flush(cx),
            #[cfg(unix)]
            WriteHalf::Unix(half) => Pin::new(half).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WriteHalf::Tcp(half) => Pin::new(half).poll_shutdown(cx),
            #[cfg(unix)]
            WriteHalf::Unix(half) => Pin::new(half).poll_shutdown(cx),
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// A bound TCP or Unix-domain listener.
///
/// Dropping it does not remove a Unix socket file; the file is only ever
/// removed by [`bind_listener`] when it is found stale.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// Accept one connection, returning it with a printable peer address.
    pub async fn accept(&self) -> io::Result<(Stream, String)> {
        let stream = match self {
            Listener::Tcp(listener) => Stream::Tcp(listener.accept().await?.0),
            #[cfg(unix)]
            Listener::Unix(listener) => Stream::Unix(listener.accept().await?.0),
        };
        let peer = stream.peer();
        Ok((stream, peer))
    }

    /// The address actually bound (resolves TCP port 0).
    pub fn local_addr(&self) -> Result<Address> {
        match self {
            Listener::Tcp(listener) => {
                let addr = listener.local_addr()?;
                Ok(Address::tcp(addr.ip().to_string(), addr.port()))
            }
            #[cfg(unix)]
            Listener::Unix(listener) => listener
                .local_addr()?
                .as_pathname()
                .map(Address::unix)
                .ok_or_else(|| {
                    PineError::IllegalArgument("unix listener has no path".to_string())
                }),
        }
    }
}

/// Connect to `addr`.
pub async fn dial(addr: &Address) -> Result<Stream> {
    match addr {
        Address::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Ok(Stream::Tcp(stream))
        }
        #[cfg(unix)]
        Address::Unix(path) => Ok(Stream::Unix(UnixStream::connect(path).await?)),
        #[cfg(not(unix))]
        Address::Unix(_) => Err(unsupported()),
    }
}

/// Listen on `addr`.
///
/// For Unix sockets, a bind that fails with "address in use" is retried once
/// if the existing socket file refuses connections, i.e. it was left behind
/// by a process that is gone. The stale file is removed before the retry.
/// Any other failure is returned as is.
pub async fn bind_listener(addr: &Address) -> Result<Listener> {
    match addr {
        Address::Tcp { host, port } => Ok(Listener::Tcp(
            TcpListener::bind((host.as_str(), *port)).await?,
        )),
        #[cfg(unix)]
        Address::Unix(path) => bind_unix(path).await,
        #[cfg(not(unix))]
        Address::Unix(_) => Err(unsupported()),
    }
}

#[cfg(unix)]
async fn bind_unix(path: &Path) -> Result<Listener> {
    match UnixListener::bind(path) {
        Ok(listener) => Ok(Listener::Unix(listener)),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            if !is_stale_socket(path).await {
                return Err(e.into());
            }
            tracing::info!(path = %path.display(), "Removing stale socket file");
            std::fs::remove_file(path)?;
            Ok(Listener::Unix(UnixListener::bind(path)?))
        }
        Err(e) => Err(e.into()),
    }
}

/// A socket file nobody is accepting on.
#[cfg(unix)]
async fn is_stale_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;

    let is_socket = std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_socket())
        .unwrap_or(false);
    if !is_socket {
        return false;
    }
    matches!(
        UnixStream::connect(path).await,
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused
    )
}

#[cfg(not(unix))]
fn unsupported() -> PineError {
    PineError::IllegalArgument("unix sockets are not supported on this platform".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_bind_dial_accept() {
        let listener = bind_listener(&Address::tcp("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let Address::Tcp { port, .. } = &addr else {
            panic!("expected tcp address, got {addr}");
        };
        assert_ne!(*port, 0);

        let mut client = dial(&addr).await.unwrap();
        let (mut server, peer) = listener.accept().await.unwrap();
        assert!(peer.starts_with("tcp!127.0.0.1!"));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_bind_dial_accept() {
        let dir = tempfile::tempdir().unwrap();
        let addr = Address::unix(dir.path().join("pine.sock"));

        let listener = bind_listener(&addr).await.unwrap();
        assert_eq!(listener.local_addr().unwrap(), addr);

        let mut client = dial(&addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        server.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");

        // Bind and drop without unlinking: the file stays, nobody listens.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = bind_listener(&Address::unix(&path)).await.unwrap();
        let _client = dial(&Address::unix(&path)).await.unwrap();
        listener.accept().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_live_socket_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let addr = Address::unix(dir.path().join("live.sock"));

        let _live = bind_listener(&addr).await.unwrap();
        let err = bind_listener(&addr).await.unwrap_err();
        assert!(matches!(err, PineError::Io(ref e) if e.kind() == io::ErrorKind::AddrInUse));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_regular_file_is_not_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-socket");
        std::fs::write(&path, b"keep me").unwrap();

        assert!(bind_listener(&Address::unix(&path)).await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_into_split_halves_are_independent() {
        let listener = bind_listener(&Address::tcp("127.0.0.1", 0)).await.unwrap();
        let client = dial(&listener.local_addr().unwrap()).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let (mut rd, mut wr) = client.into_split();
        wr.write_all(b"ping").await.unwrap();
        wr.shutdown().await.unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"ping");

        // The read half still works after the write half shut down.
        server.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        rd.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // Grab a free port, then close it.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = dial(&Address::tcp("127.0.0.1", port)).await.unwrap_err();
        assert!(matches!(err, PineError::Io(_)));
    }
}
