//! The per-socket WebSocket state machine.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! Connecting ──accept(key)──► Open ──close frame / close() / socket error──► Closed
//!      │                                                                       ▲
//!      └──────────────── bad key: 400 written ─────────────────────────────────┘
//! ```
//!
//! - `Connecting`: the socket was accepted but the 101 response is not out yet.
//! - `Open`: frames flow in both directions.
//! - `Closed`: terminal.  The sink has been dropped, which releases the
//!   socket, and every further call is a no-op.
//!
//! # No I/O of its own
//!
//! A [`Connection`] never reads.  Its owner feeds it whatever bytes arrived
//! via [`Connection::receive`] and gets back the events those bytes
//! completed.  Writes go to the `W: Write` sink the connection owns; each
//! frame is handed over in a single `write_all` call, so a sink that forwards
//! whole buffers (see the server's channel sink) never interleaves frames.

use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::event::{decode_event, FrameEvent};
use crate::protocol::frame::{
    encode_close_frame, encode_text_frame, FrameError, Opcode, DEFAULT_MAX_PAYLOAD_LEN,
};
use crate::protocol::handshake::{accept_response, reject_response, HandshakeError};

/// Protocol state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, handshake response not written yet.
    Connecting,
    /// Handshake complete; frames flow.
    Open,
    /// Terminal.
    Closed,
}

/// Why a connection reached [`ConnectionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The owner called [`Connection::close`].
    Local,
    /// The peer sent a close frame.
    PeerClosed { code: Option<u16> },
    /// The peer sent bytes that are not a valid frame.
    Protocol(FrameError),
    /// The peer sent a well-formed frame this engine does not handle.
    Unsupported { opcode: Opcode, fin: bool },
    /// The socket reported EOF, a reset, or a failed write.
    Socket(String),
}

/// Something the owner of a connection needs to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A complete text message from the peer.
    Text(String),
    /// The connection is now closed; no further events follow.
    Closed(CloseReason),
}

/// Errors returned by [`Connection`] operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The upgrade was refused; a 4xx response was written and the
    /// connection is closed.
    #[error("handshake rejected: {0}")]
    Handshake(#[from] HandshakeError),

    /// Writing to the socket failed; the connection is closed.
    #[error("socket write failed: {0}")]
    Socket(#[from] io::Error),

    /// The operation is not valid in the current state.
    #[error("operation not valid in state {0:?}")]
    InvalidState(ConnectionState),
}

/// Tunables for a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest payload a single inbound frame may declare.
    ///
    /// This also bounds the receive buffer: complete frames are drained
    /// immediately, so at most one header plus this many bytes stay buffered.
    pub max_payload_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

/// One socket promoted (or being promoted) to the WebSocket protocol.
pub struct Connection<W: Write> {
    /// Exclusive write handle; `None` once released.
    sink: Option<W>,
    state: ConnectionState,
    /// Bytes received but not yet part of a complete frame.
    buffer: Vec<u8>,
    limits: Limits,
}

impl<W: Write> Connection<W> {
    /// Wraps a freshly accepted socket's write handle.
    pub fn new(sink: W, limits: Limits) -> Self {
        Self {
            sink: Some(sink),
            state: ConnectionState::Connecting,
            buffer: Vec::new(),
            limits,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `true` while frames can be sent and received.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// The sink, unless the connection has already released it.
    #[cfg(test)]
    fn sink(&self) -> Option<&W> {
        self.sink.as_ref()
    }

    /// Answers the upgrade request that carried `key` (the raw
    /// `Sec-WebSocket-Key` value, `None` if the header was absent).
    ///
    /// On success the `101 Switching Protocols` response is written and the
    /// connection is [`ConnectionState::Open`].  On a missing or malformed
    /// key a `400 Bad Request` is written instead and the connection goes
    /// straight to [`ConnectionState::Closed`].
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Handshake`] when the key is missing or malformed.
    /// - [`ConnectionError::Socket`] when the response cannot be written.
    /// - [`ConnectionError::InvalidState`] when called outside `Connecting`.
    pub fn accept(&mut self, key: Option<&str>) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidState(self.state));
        }

        let response = key
            .map(str::trim)
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))
            .and_then(accept_response);

        match response {
            Ok(bytes) => {
                self.write(&bytes)?;
                self.state = ConnectionState::Open;
                debug!("handshake complete; connection open");
                Ok(())
            }
            Err(err) => {
                self.reject(&err);
                Err(err.into())
            }
        }
    }

    /// Refuses the upgrade with the HTTP status matching `err` and closes.
    ///
    /// Only meaningful in `Connecting`; in any other state this is a no-op.
    pub fn reject(&mut self, err: &HandshakeError) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        warn!("rejecting WebSocket upgrade: {err}");
        // The connection is closing either way; a failed write changes nothing.
        let _ = self.write(&reject_response(err));
        self.release();
    }

    /// Feeds newly arrived bytes through the frame decoder.
    ///
    /// Frames are processed strictly in order.  Decoding stops at the first
    /// incomplete frame (its bytes stay buffered) or when the connection
    /// closes.  Bytes arriving while not `Open` are dropped.
    pub fn receive(&mut self, chunk: &[u8]) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        if self.state != ConnectionState::Open {
            debug!(
                "dropping {} inbound bytes in state {:?}",
                chunk.len(),
                self.state
            );
            return events;
        }

        self.buffer.extend_from_slice(chunk);

        while self.state == ConnectionState::Open {
            match decode_event(&self.buffer, self.limits.max_payload_len) {
                Ok((FrameEvent::Incomplete, _)) => break,
                Ok((FrameEvent::Text(text), consumed)) => {
                    self.buffer.drain(..consumed);
                    debug!("text frame: {} bytes", text.len());
                    events.push(ConnectionEvent::Text(text));
                }
                Ok((FrameEvent::Close(code), consumed)) => {
                    self.buffer.drain(..consumed);
                    debug!("close frame from peer (code={code:?})");
                    events.push(self.finish(CloseReason::PeerClosed { code }));
                }
                Ok((FrameEvent::Unsupported { opcode, fin }, _)) => {
                    warn!("unsupported frame: opcode={opcode:?} fin={fin}; failing connection");
                    events.push(self.finish(CloseReason::Unsupported { opcode, fin }));
                }
                Err(err) => {
                    warn!("protocol error: {err}; failing connection");
                    events.push(self.finish(CloseReason::Protocol(err)));
                }
            }
        }

        events
    }

    /// Sends `text` as one text frame.
    ///
    /// A no-op (returning `Ok`) unless the connection is `Open`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Socket`] if the write fails; the connection
    /// is then already `Closed`.
    pub fn send(&mut self, text: &str) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Open {
            debug!("send ignored in state {:?}", self.state);
            return Ok(());
        }
        self.write(&encode_text_frame(text))
    }

    /// Closes the connection from this side.
    ///
    /// Writes the close frame `0x88 0x00` (only if the connection was open)
    /// and releases the socket.  Calling it again does nothing.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.finish(CloseReason::Local);
    }

    /// Records that the socket itself went away (EOF, reset, read error).
    ///
    /// No close frame is written.  Returns the `Closed` event for the owner,
    /// or `None` if the connection had already closed.
    pub fn socket_closed(&mut self, detail: &str) -> Option<ConnectionEvent> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        debug!("socket closed: {detail}");
        self.release();
        Some(ConnectionEvent::Closed(CloseReason::Socket(detail.to_string())))
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Sends the close frame if frames were flowing, then releases.
    fn finish(&mut self, reason: CloseReason) -> ConnectionEvent {
        if self.state == ConnectionState::Open {
            if let Err(err) = self.write(&encode_close_frame()) {
                debug!("close frame not delivered: {err}");
            }
        }
        if self.state != ConnectionState::Closed {
            info!("connection closed: {reason:?}");
        }
        self.release();
        ConnectionEvent::Closed(reason)
    }

    /// Writes one whole buffer.  A failure releases the socket.
    fn write(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let result = match self.sink.as_mut() {
            Some(sink) => sink.write_all(bytes).and_then(|()| sink.flush()),
            None => return Ok(()),
        };
        if let Err(err) = result {
            warn!("socket write failed: {err}");
            self.release();
            return Err(ConnectionError::Socket(err));
        }
        Ok(())
    }

    fn release(&mut self) {
        self.state = ConnectionState::Closed;
        self.sink = None;
        self.buffer = Vec::new();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
