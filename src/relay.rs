//! One-way relay loops and their pairing into a duplex connection.
//!
//! A connection runs two [`DuplexRelay`] tasks, local→remote and
//! remote→local. Each reads in [`CHUNK_SIZE`] chunks, writes every chunk to
//! the other side in full, and then feeds a copy to its own
//! [`FrameObserver`]. Observation is a side channel: its failures are logged
//! as warnings and never stop or delay forwarding.
//!
//! # Teardown
//!
//! ```text
//! local  ──read──► relay A ──write──► remote
//! local ◄──write── relay B ◄──read──  remote
//! ```
//!
//! Whichever direction stops first (end of stream, I/O error) closes both
//! [`Endpoint`]s. The other direction is always waiting on those endpoints
//! alongside its own read or write, so it wakes up and stops with
//! [`Termination::ClosedByPeer`], which is not an error.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::config::ObserverConfig;
use crate::error::{PineError, Result};
use crate::protocol::{FrameObserver, FrameRenderer};
use crate::transport::{Endpoint, Stream};

/// Bytes read from the source per iteration.
pub const CHUNK_SIZE: usize = 256;

/// Creates the sink each observer writes rendered frames to.
pub type OutputFactory = Arc<dyn Fn() -> Box<dyn Write + Send> + Send + Sync>;

/// Which way a relay copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::LocalToRemote => write!(f, "local->remote"),
            Direction::RemoteToLocal => write!(f, "remote->local"),
        }
    }
}

/// Why a relay loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The source reached end of stream.
    Eof,
    /// The other direction closed the endpoints first.
    ClosedByPeer,
    /// Reading from the source failed.
    ReadFailed,
    /// Writing to the sink failed.
    WriteFailed,
}

/// Result of one relay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub direction: Direction,
    pub termination: Termination,
    /// Bytes fully written to the sink.
    pub bytes: u64,
}

/// Copies one direction of a connection, observing what passes through.
pub struct DuplexRelay<R, W> {
    direction: Direction,
    reader: R,
    writer: W,
    source: Arc<Endpoint>,
    sink: Arc<Endpoint>,
    observer: Option<FrameObserver>,
    output: Box<dyn Write + Send>,
}

impl<R, W> DuplexRelay<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Relay from `reader` (belonging to `source`) into `writer` (belonging
    /// to `sink`), without observation.
    pub fn new(
        direction: Direction,
        reader: R,
        writer: W,
        source: Arc<Endpoint>,
        sink: Arc<Endpoint>,
    ) -> Self {
        Self {
            direction,
            reader,
            writer,
            source,
            sink,
            observer: None,
            output: Box::new(io::sink()),
        }
    }

    /// Feed every forwarded chunk to `observer`, printing frames to `output`.
    pub fn observe(mut self, observer: FrameObserver, output: Box<dyn Write + Send>) -> Self {
        self.observer = Some(observer);
        self.output = output;
        self
    }

    /// Copy until end of stream, an error, or the endpoints are closed.
    ///
    /// Always closes both endpoints before returning.
    pub async fn run(self) -> RelayOutcome {
        let Self {
            direction,
            mut reader,
            mut writer,
            source,
            sink,
            mut observer,
            mut output,
        } = self;

        tracing::debug!(
            %direction,
            from = source.addr(),
            to = sink.addr(),
            "Starting relay"
        );

        let mut chunk = [0u8; CHUNK_SIZE];
        let mut bytes = 0u64;

        let termination = loop {
            let read = tokio::select! {
                biased;
                _ = source.closed() => break Termination::ClosedByPeer,
                _ = sink.closed() => break Termination::ClosedByPeer,
                read = reader.read(&mut chunk) => read,
            };
            let n = match read {
                Ok(0) => break Termination::Eof,
                Ok(n) => n,
                Err(_) if source.is_closed() || sink.is_closed() => {
                    break Termination::ClosedByPeer
                }
                Err(e) => {
                    tracing::error!(
                        %direction,
                        endpoint = source.name(),
                        addr = source.addr(),
                        cause = %e,
                        "Could not read"
                    );
                    break Termination::ReadFailed;
                }
            };

            match forward(&mut writer, &sink, &chunk[..n]).await {
                Ok(()) => bytes += n as u64,
                Err(PineError::ConnectionClosed) => break Termination::ClosedByPeer,
                Err(_) if source.is_closed() || sink.is_closed() => {
                    break Termination::ClosedByPeer
                }
                Err(e) => {
                    tracing::error!(
                        %direction,
                        endpoint = sink.name(),
                        addr = sink.addr(),
                        cause = %e,
                        "Could not write"
                    );
                    break Termination::WriteFailed;
                }
            }

            if let Some(observer) = observer.as_mut() {
                observe(observer, output.as_mut(), &chunk[..n], direction);
            }
        };

        source.close();
        sink.close();
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(
                %direction,
                endpoint = sink.name(),
                cause = %e,
                "Could not shut down writer"
            );
        }

        tracing::debug!(%direction, ?termination, bytes, "Relay finished");
        RelayOutcome {
            direction,
            termination,
            bytes,
        }
    }
}

/// Write all of `data`, giving up if `sink` is closed meanwhile.
async fn forward<W>(writer: &mut W, sink: &Endpoint, mut data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !data.is_empty() {
        let written = tokio::select! {
            biased;
            _ = sink.closed() => return Err(PineError::ConnectionClosed),
            written = writer.write(data) => written?,
        };
        if written == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
        }
        data = &data[written..];
    }
    Ok(())
}

fn observe(
    observer: &mut FrameObserver,
    output: &mut (dyn Write + Send),
    chunk: &[u8],
    direction: Direction,
) {
    if let Err(e) = observer.ingest(chunk) {
        if e.is_diagnostic() {
            tracing::warn!(
                %direction,
                cause = %e,
                "Failed ingesting - is the buffer size large enough? Check --msize against the negotiated msize"
            );
        } else {
            tracing::warn!(%direction, cause = %e, "Failed ingesting");
        }
    }
    if let Err(e) = observer.drain_frames(output) {
        tracing::warn!(%direction, cause = %e, "Failed logging observed frames");
    }
}

/// How each connection's observers are built and where they print.
#[derive(Clone)]
pub struct Observation {
    pub config: ObserverConfig,
    pub renderer: Arc<dyn FrameRenderer>,
    pub output: OutputFactory,
}

impl Observation {
    pub fn new(
        config: ObserverConfig,
        renderer: Arc<dyn FrameRenderer>,
        output: OutputFactory,
    ) -> Self {
        Self {
            config,
            renderer,
            output,
        }
    }

    fn build(&self, direction: Direction) -> Option<(FrameObserver, Box<dyn Write + Send>)> {
        match FrameObserver::from_config(&self.config, self.renderer.clone()) {
            Ok(observer) => Some((observer, (self.output)())),
            Err(e) => {
                tracing::warn!(%direction, cause = %e, "Could not create frame observer, relaying unobserved");
                None
            }
        }
    }
}

impl fmt::Debug for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The two relay tasks of one connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub to_remote: JoinHandle<RelayOutcome>,
    pub to_local: JoinHandle<RelayOutcome>,
}

impl ConnectionHandle {
    /// Wait for both directions to finish.
    pub async fn join(self) -> std::result::Result<(RelayOutcome, RelayOutcome), tokio::task::JoinError> {
        let to_remote = self.to_remote.await?;
        let to_local = self.to_local.await?;
        Ok((to_remote, to_local))
    }
}

/// Start relaying between an accepted `local` stream and a dialed `remote`.
pub fn spawn_connection(
    local: Stream,
    local_addr: String,
    remote: Stream,
    remote_addr: String,
    observation: &Observation,
) -> ConnectionHandle {
    let local_end = Arc::new(Endpoint::new("local", local_addr));
    let remote_end = Arc::new(Endpoint::new("remote", remote_addr));
    let (local_rd, local_wr) = local.into_split();
    let (remote_rd, remote_wr) = remote.into_split();

    let mut outbound = DuplexRelay::new(
        Direction::LocalToRemote,
        local_rd,
        remote_wr,
        local_end.clone(),
        remote_end.clone(),
    );
    if let Some((observer, output)) = observation.build(Direction::LocalToRemote) {
        outbound = outbound.observe(observer, output);
    }

    let mut inbound = DuplexRelay::new(
        Direction::RemoteToLocal,
        remote_rd,
        local_wr,
        remote_end,
        local_end,
    );
    if let Some((observer, output)) = observation.build(Direction::RemoteToLocal) {
        inbound = inbound.observe(observer, output);
    }

    ConnectionHandle {
        to_remote: tokio::spawn(outbound.run()),
        to_local: tokio::spawn(inbound.run()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Fcall, NinePRenderer};
    use crate::transport::{bind_listener, dial, Address};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::duplex;

    /// Cloneable in-memory sink for rendered lines.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn endpoints() -> (Arc<Endpoint>, Arc<Endpoint>) {
        (
            Arc::new(Endpoint::new("local", "test!local")),
            Arc::new(Endpoint::new("remote", "test!remote")),
        )
    }

    #[tokio::test]
    async fn test_forwards_until_eof_and_closes_both() {
        let (mut client, relay_in) = duplex(64);
        let (relay_out, mut server) = duplex(4096);
        let (local, remote) = endpoints();

        let relay = DuplexRelay::new(
            Direction::LocalToRemote,
            relay_in,
            relay_out,
            local.clone(),
            remote.clone(),
        );
        let task = tokio::spawn(relay.run());

        let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        client.write_all(&payload).await.unwrap();
        drop(client);

        let outcome = task.await.unwrap();
        assert_eq!(outcome.termination, Termination::Eof);
        assert_eq!(outcome.bytes, 1000);
        assert!(local.is_closed());
        assert!(remote.is_closed());

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_observes_frames_split_across_chunks() {
        let (mut client, relay_in) = duplex(8);
        let (relay_out, mut server) = duplex(4096);
        let (local, remote) = endpoints();
        let captured = Captured::default();

        let mut stream = Vec::new();
        let mut expected = String::new();
        for i in 0..20u16 {
            let fcall = Fcall::new(
                i,
                crate::protocol::ninep::Body::Twalk {
                    fid: 0,
                    newfid: u32::from(i) + 1,
                    wnames: vec!["usr".into(), "glenda".into(), "lib".into()],
                },
            );
            stream.extend_from_slice(&fcall.encode());
            expected.push_str(&format!("{fcall}\n"));
        }

        let relay = DuplexRelay::new(Direction::LocalToRemote, relay_in, relay_out, local, remote)
            .observe(
                FrameObserver::new(Arc::new(NinePRenderer)),
                Box::new(captured.clone()),
            );
        let task = tokio::spawn(relay.run());

        client.write_all(&stream).await.unwrap();
        drop(client);
        task.await.unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, stream);
        assert_eq!(captured.text(), expected);
    }

    #[tokio::test]
    async fn test_garbage_is_forwarded_even_when_observation_fails() {
        let (mut client, relay_in) = duplex(64);
        let (relay_out, mut server) = duplex(4096);
        let (local, remote) = endpoints();
        let captured = Captured::default();

        let observer = FrameObserver::with_buffer(
            crate::ring::ObserverBuffer::fixed(4).unwrap(),
            Arc::new(NinePRenderer),
        );
        let relay = DuplexRelay::new(Direction::LocalToRemote, relay_in, relay_out, local, remote)
            .observe(observer, Box::new(captured.clone()));
        let task = tokio::spawn(relay.run());

        let garbage = vec![0xFFu8; 600];
        client.write_all(&garbage).await.unwrap();
        drop(client);

        let outcome = task.await.unwrap();
        assert_eq!(outcome.termination, Termination::Eof);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, garbage);
        assert!(captured.text().is_empty());
    }

    #[tokio::test]
    async fn test_close_from_other_direction_stops_blocked_read() {
        let (_client, relay_in) = duplex(64);
        let (relay_out, _server) = duplex(64);
        let (local, remote) = endpoints();

        let relay = DuplexRelay::new(
            Direction::RemoteToLocal,
            relay_in,
            relay_out,
            remote.clone(),
            local.clone(),
        );
        let task = tokio::spawn(relay.run());

        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        // The paired direction finished and closed both endpoints.
        local.close();
        remote.close();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.termination, Termination::ClosedByPeer);
        assert_eq!(outcome.bytes, 0);
    }

    #[tokio::test]
    async fn test_close_unblocks_stalled_write() {
        let (mut client, relay_in) = duplex(1024);
        // Tiny pipe nobody drains: the relay's write stalls.
        let (relay_out, _server) = duplex(16);
        let (local, remote) = endpoints();

        let relay = DuplexRelay::new(
            Direction::LocalToRemote,
            relay_in,
            relay_out,
            local.clone(),
            remote.clone(),
        );
        let task = tokio::spawn(relay.run());

        client.write_all(&[7u8; 512]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        remote.close();
        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.termination, Termination::ClosedByPeer);
        assert!(local.is_closed());
    }

    #[tokio::test]
    async fn test_write_failure_closes_both() {
        let (mut client, relay_in) = duplex(64);
        let (relay_out, server) = duplex(64);
        drop(server);
        let (local, remote) = endpoints();

        let relay = DuplexRelay::new(
            Direction::LocalToRemote,
            relay_in,
            relay_out,
            local.clone(),
            remote.clone(),
        );
        let task = tokio::spawn(relay.run());

        client.write_all(b"hello").await.unwrap();
        let outcome = task.await.unwrap();
        assert_eq!(outcome.termination, Termination::WriteFailed);
        assert!(local.is_closed());
        assert!(remote.is_closed());
    }

    #[tokio::test]
    async fn test_connection_join_reports_both_directions() {
        let client_side = bind_listener(&Address::tcp("127.0.0.1", 0)).await.unwrap();
        let server_side = bind_listener(&Address::tcp("127.0.0.1", 0)).await.unwrap();

        let mut client = dial(&client_side.local_addr().unwrap()).await.unwrap();
        let (local, local_addr) = client_side.accept().await.unwrap();
        let remote = dial(&server_side.local_addr().unwrap()).await.unwrap();
        let (mut server, remote_addr) = server_side.accept().await.unwrap();

        let captured = Captured::default();
        let sink = captured.clone();
        let observation = Observation::new(
            ObserverConfig::default(),
            Arc::new(NinePRenderer),
            Arc::new(move || Box::new(sink.clone()) as Box<dyn Write + Send>),
        );
        let handle = spawn_connection(local, local_addr, remote, remote_addr, &observation);

        let frame = Fcall::version(8192, "9P2000").encode();
        client.write_all(&frame).await.unwrap();
        let mut received = vec![0u8; frame.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, frame);

        client.shutdown().await.unwrap();
        let (to_remote, to_local) = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(to_remote.direction, Direction::LocalToRemote);
        assert_eq!(to_remote.termination, Termination::Eof);
        assert_eq!(to_remote.bytes, frame.len() as u64);
        assert_eq!(to_local.direction, Direction::RemoteToLocal);
        assert_eq!(to_local.bytes, 0);
        assert_eq!(
            captured.text(),
            "Tversion tag 65535 msize 8192 version '9P2000'\n"
        );
    }

    /// Accepts every write, refuses to shut down.
    struct StuckShutdown;

    impl AsyncWrite for StuckShutdown {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Err(io::Error::from(io::ErrorKind::NotConnected)))
        }
    }

    #[tokio::test]
    async fn test_shutdown_failure_does_not_change_outcome() {
        let (mut client, relay_in) = duplex(64);
        let (local, remote) = endpoints();

        let relay = DuplexRelay::new(
            Direction::LocalToRemote,
            relay_in,
            StuckShutdown,
            local.clone(),
            remote.clone(),
        );
        let task = tokio::spawn(relay.run());

        client.write_all(b"Tclunk").await.unwrap();
        drop(client);

        let outcome = task.await.unwrap();
        assert_eq!(outcome.termination, Termination::Eof);
        assert_eq!(outcome.bytes, 6);
        assert!(local.is_closed());
        assert!(remote.is_closed());
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::LocalToRemote.to_string(), "local->remote");
        assert_eq!(Direction::RemoteToLocal.to_string(), "remote->local");
    }
}
