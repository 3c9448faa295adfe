//! Dedicated writer task for rendered frame lines.
//!
//! Observers run inside the relay tasks and must never block them, so each
//! one gets a [`LineSender`]: a synchronous [`Write`] that only enqueues.
//! A single writer task drains the queue into the real output.
//!
//! ```text
//! observer (conn 1, local->remote) ─┐
//! observer (conn 1, remote->local) ─┼─► mpsc::Sender<Bytes> ─► writer task ─► stdout
//! observer (conn N, ...)           ─┘
//! ```
//!
//! When the queue is full the line is rejected with `WouldBlock` instead of
//! waiting; the observer logs it and carries on.

use std::io::{self, Write};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::Result;

/// Default number of lines queued before new ones are dropped.
pub const DEFAULT_LINE_CAPACITY: usize = 1024;

/// Maximum lines written per flush.
const MAX_BATCH_SIZE: usize = 64;

/// Enqueuing end of the line channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LineSender {
    tx: mpsc::Sender<Bytes>,
}

impl Write for LineSender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.tx.try_send(Bytes::copy_from_slice(buf)) {
            Ok(()) => Ok(buf.len()),
            Err(TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "output queue is full, line dropped",
            )),
            Err(TrySendError::Closed(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "output writer has stopped",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn channel(capacity: usize) -> (LineSender, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(capacity);
    (LineSender { tx }, rx)
}

/// Spawn the writer task draining queued lines into `writer`.
///
/// The task ends cleanly once every [`LineSender`] is dropped, or with the
/// first write error.
pub fn spawn_line_writer<W>(writer: W, capacity: usize) -> (LineSender, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (sender, rx) = channel(capacity);
    let task = tokio::spawn(writer_loop(rx, writer));
    (sender, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        writer.write_all(&first).await?;

        let mut batched = 1;
        while batched < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(line) => writer.write_all(&line).await?,
                Err(_) => break,
            }
            batched += 1;
        }

        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_lines_reach_writer_in_order() {
        let (writer, mut reader) = duplex(4096);
        let (sender, task) = spawn_line_writer(writer, 16);

        let mut a = sender.clone();
        let mut b = sender;
        a.write_all(b"Tclunk tag 1 fid 2\n").unwrap();
        b.write_all(b"Rclunk tag 1\n").unwrap();
        drop(a);
        drop(b);

        task.await.unwrap().unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "Tclunk tag 1 fid 2\nRclunk tag 1\n");
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let (mut sender, _rx) = channel(1);
        sender.write_all(b"first\n").unwrap();

        let err = sender.write_all(b"second\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_stopped_writer_is_broken_pipe() {
        let (mut sender, rx) = channel(4);
        drop(rx);

        let err = sender.write_all(b"line\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_write_error_stops_task() {
        let (writer, reader) = duplex(64);
        drop(reader);
        let (mut sender, task) = spawn_line_writer(writer, 4);

        sender.write_all(b"Rflush tag 3\n").unwrap();
        assert!(task.await.unwrap().is_err());
    }
}
