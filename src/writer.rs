//! Dedicated writer task for serialized frame sending.
//!
//! Every connection owns one writer task that receives frames via an mpsc
//! channel. Frames from concurrent callers or handlers therefore never
//! interleave on the wire, and several ready frames go out in a single
//! vectored write.
//!
//! # Architecture
//!
//! ```text
//! Caller / Handler 1 ─┐
//! Caller / Handler 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Socket
//! Caller / Handler N ─┘
//! ```
//!
//! When every [`WriterHandle`] is dropped the task drains what is queued,
//! shuts down the write half, and exits. A task started with
//! [`spawn_writer_task_with_shutdown`] also stops when its shutdown flag is
//! set, dropping whatever is still queued.

use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{RpcError, Result};
use crate::protocol::{OutboundFrame, FRAME_DELIMITER};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame for writing.
    ///
    /// Waits while the channel is full.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| RpcError::ConnectionClosed("writer task stopped".into()))
    }

    /// True once the writer task has exited.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)` where the JoinHandle resolves once
/// the channel is closed and the write half has been shut down, or on the
/// first write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn(writer, config, None)
}

/// Spawn the writer task, also stopping it once `shutdown` reads `true` or
/// its sender is dropped.
pub fn spawn_writer_task_with_shutdown<W>(
    writer: W,
    config: WriterConfig,
    shutdown: watch::Receiver<bool>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn(writer, config, Some(shutdown))
}

fn spawn<W>(
    writer: W,
    config: WriterConfig,
    shutdown: Option<watch::Receiver<bool>>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer, shutdown));
    (WriterHandle { tx }, task)
}

/// Resolves once the flag is `true` or the sender is gone.
pub(crate) async fn signalled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn wait_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => signalled(rx).await,
        None => std::future::pending().await,
    }
}

/// Main writer loop - receives frames and writes them to the socket.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    mut shutdown: Option<watch::Receiver<bool>>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let first = tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = wait_shutdown(&mut shutdown) => break,
        };

        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::debug!("writer stopped: {}", e);
            return Err(e);
        }
        batch.clear();
    }

    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after the first `skip_bytes` bytes.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for frame in batch {
        for segment in [&frame.header[..], &frame.payload[..], FRAME_DELIMITER] {
            let end = offset + segment.len();
            if skip_bytes < end && !segment.is_empty() {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&segment[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn frame(header: &'static [u8], payload: &'static [u8]) -> OutboundFrame {
        OutboundFrame::new(Bytes::from_static(header), Bytes::from_static(payload))
    }

    #[test]
    fn test_writer_config_default() {
        assert_eq!(
            WriterConfig::default().channel_capacity,
            DEFAULT_CHANNEL_CAPACITY
        );
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(frame(b"{}", b"{}")).await.unwrap();

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"{}{} ");
    }

    #[tokio::test]
    async fn test_frames_never_interleave() {
        let (client, mut server) = duplex(1 << 16);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        let mut senders = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            senders.push(tokio::spawn(async move {
                for _ in 0..10 {
                    handle.send(frame(b"[1,2,3]", b"[4,5,6]")).await.unwrap();
                }
            }));
        }
        for sender in senders {
            sender.await.unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"[1,2,3][4,5,6] ".repeat(80));
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![frame(b"head", b"body")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 3); // header + payload + delimiter
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![frame(b"head", b"body")];
        let slices = build_remaining_slices(&batch, 1);
        assert_eq!(slices.len(), 3);
        assert_eq!(&slices[0][..], b"ead");
    }

    #[test]
    fn test_build_remaining_slices_skip_payload() {
        let batch = vec![frame(b"head", b"body"), frame(b"h2", b"p2")];
        let slices = build_remaining_slices(&batch, 8);
        assert_eq!(slices.len(), 4);
        assert_eq!(&slices[0][..], b" ");
        assert_eq!(&slices[1][..], b"h2");
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| frame(b"ab", b"cd")).collect();

        write_batch(&mut buf, &batch).await.unwrap();
        assert_eq!(buf.into_inner(), b"abcd ".repeat(5));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);
        assert!(task.await.unwrap().is_ok());

        // Write half was shut down, so the peer sees end of stream.
        let mut out = Vec::new();
        assert_eq!(server.read_to_end(&mut out).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_writer() {
        let (client, mut server) = duplex(4096);
        let (tx, rx) = watch::channel(false);
        let (handle, task) =
            spawn_writer_task_with_shutdown(client, WriterConfig::default(), rx);

        handle.send(frame(b"{}", b"{}")).await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();

        tx.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());
        assert!(handle.is_closed());

        let mut out = Vec::new();
        assert_eq!(server.read_to_end(&mut out).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_after_writer_exit() {
        let (client, server) = duplex(16);
        drop(server);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        let _ = handle.send(frame(b"{}", b"{}")).await;
        assert!(task.await.unwrap().is_err());
        assert!(matches!(
            handle.send(frame(b"{}", b"{}")).await,
            Err(RpcError::ConnectionClosed(_))
        ));
    }
}
