//! Bridges the synchronous frame engine onto Tokio sockets.
//!
//! [`Connection`](zc_core::Connection) writes through a plain
//! [`std::io::Write`].  On a Tokio socket that write cannot block, so
//! [`ChannelSink`] hands every buffer to a dedicated writer task through a
//! bounded channel instead.  The writer task is the only code that ever
//! touches the socket's write half, so buffers reach the wire whole and in
//! order.
//!
//! # Backpressure
//!
//! A peer that stops reading must not make the server buffer without limit.
//! The sink tracks how many bytes are queued but not yet written, and fails
//! with [`io::ErrorKind::WouldBlock`] once another buffer would push that
//! past the configured cap (or the channel's frame slots run out).  The
//! connection treats the failed write like any other socket error and
//! closes.  A single buffer is always accepted into an empty queue, so one
//! maximum-size frame never trips the cap on its own.
//!
//! When the sink is dropped (the connection releases it on close) the
//! channel closes, the writer drains whatever is still queued, then shuts
//! the write half down so the peer sees EOF.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use zc_core::protocol::handshake::find_head_end;
use zc_core::HandshakeError;

/// Most buffers a writer task holds before its sink refuses more.
pub const WRITER_QUEUE_FRAMES: usize = 128;

/// [`Write`] adapter that queues buffers for a writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
    /// Bytes handed to the writer task and not yet written to the socket.
    queued: Arc<AtomicUsize>,
    max_queued_bytes: usize,
}

impl Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let queued = self.queued.fetch_add(buf.len(), Ordering::AcqRel);
        if queued > 0 && queued + buf.len() > self.max_queued_bytes {
            self.queued.fetch_sub(buf.len(), Ordering::AcqRel);
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("peer is not reading: {queued} bytes already queued"),
            ));
        }

        match self.tx.try_send(buf.to_vec()) {
            Ok(()) => Ok(buf.len()),
            Err(err) => {
                self.queued.fetch_sub(buf.len(), Ordering::AcqRel);
                Err(match err {
                    TrySendError::Full(_) => io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "peer is not reading: send queue is full",
                    ),
                    TrySendError::Closed(_) => {
                        io::Error::new(io::ErrorKind::BrokenPipe, "socket writer has stopped")
                    }
                })
            }
        }
    }

    /// Queued buffers are flushed by the writer task.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Spawns the writer task for `write_half` and returns the sink feeding it.
///
/// `max_queued_bytes` caps the unwritten bytes the sink will accept.  The
/// returned handle resolves once every queued buffer has been written (or a
/// write failed) and the write half has been shut down.
pub fn spawn_writer<W>(
    mut write_half: W,
    session_id: String,
    max_queued_bytes: usize,
) -> (ChannelSink, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(WRITER_QUEUE_FRAMES);
    let queued = Arc::new(AtomicUsize::new(0));
    let writer_queued = Arc::clone(&queued);

    let task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            let result = write_half.write_all(&bytes).await;
            writer_queued.fetch_sub(bytes.len(), Ordering::AcqRel);
            if let Err(e) = result {
                warn!("session {session_id}: socket write failed: {e}");
                return;
            }
        }
        if let Err(e) = write_half.shutdown().await {
            debug!("session {session_id}: shutdown after close failed: {e}");
        }
    });

    let sink = ChannelSink {
        tx,
        queued,
        max_queued_bytes,
    };
    (sink, task)
}

/// Failure while waiting for the request head.
#[derive(Debug, Error)]
pub enum HeadReadError {
    /// The request must be refused with an HTTP error status.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The socket failed; there is nobody left to answer.
    #[error("socket read failed: {0}")]
    Io(#[from] io::Error),
}

/// Reads from `reader` until `buf` holds a complete HTTP request head.
///
/// Returns the head length (including the blank line).  Bytes past the head
/// stay in `buf`; a client may pipeline its first frame behind the upgrade.
///
/// Returns `Ok(None)` if the peer closed the socket before finishing the head.
///
/// # Errors
///
/// - [`HeadReadError::Handshake`] with `HeadTooLarge` when the head is longer
///   than `limit` bytes, whether or not its blank line has arrived.
/// - [`HeadReadError::Io`] on a socket read error.
pub async fn read_request_head<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> Result<Option<usize>, HeadReadError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = find_head_end(buf) {
            if end > limit {
                return Err(HandshakeError::HeadTooLarge { limit }.into());
            }
            return Ok(Some(end));
        }
        if buf.len() > limit {
            return Err(HandshakeError::HeadTooLarge { limit }.into());
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Builds a complete `HTTP/1.1` response with a body.
pub fn http_response(status: u16, reason: &str, content_type: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    )
    .into_bytes()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
