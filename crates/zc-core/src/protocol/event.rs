//! Classification of decoded frames into the events a connection acts on.
//!
//! Only unfragmented text and close frames are supported.  Everything else
//! still decodes cleanly (so the connection can account for the bytes) but
//! comes out as [`FrameEvent::Unsupported`], which the connection treats as
//! a protocol violation.  Adding fragmentation or ping/pong later means
//! adding variants here, not reworking the decoder.

use crate::protocol::frame::{decode_frame, Decoded, Frame, FrameError, Opcode};

/// What the head of a receive buffer means to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// More bytes are needed before anything can be decided.
    Incomplete,
    /// A complete, final text frame with its UTF-8 payload.
    Text(String),
    /// The peer sent a close frame, optionally carrying a status code.
    Close(Option<u16>),
    /// A well-formed frame this engine does not handle
    /// (binary, ping, pong, continuation, or any fragment with `fin = 0`).
    Unsupported { opcode: Opcode, fin: bool },
}

/// Decodes and classifies one frame from the beginning of `bytes`.
///
/// Returns the event and the number of bytes it consumed (0 for
/// [`FrameEvent::Incomplete`]).
///
/// # Errors
///
/// Propagates [`FrameError`] from the decoder, and additionally reports
/// invalid UTF-8 in text frames and one-byte close payloads.
pub fn decode_event(
    bytes: &[u8],
    max_payload_len: usize,
) -> Result<(FrameEvent, usize), FrameError> {
    match decode_frame(bytes, max_payload_len)? {
        Decoded::Incomplete => Ok((FrameEvent::Incomplete, 0)),
        Decoded::Complete { frame, consumed } => Ok((classify(frame)?, consumed)),
    }
}

fn classify(frame: Frame) -> Result<FrameEvent, FrameError> {
    if !frame.fin {
        return Ok(FrameEvent::Unsupported {
            opcode: frame.opcode,
            fin: false,
        });
    }

    match frame.opcode {
        Opcode::Text => String::from_utf8(frame.payload)
            .map(FrameEvent::Text)
            .map_err(|_| FrameError::InvalidUtf8),
        Opcode::Close => match frame.payload.len() {
            0 => Ok(FrameEvent::Close(None)),
            1 => Err(FrameError::MalformedClosePayload),
            _ => Ok(FrameEvent::Close(Some(u16::from_be_bytes([
                frame.payload[0],
                frame.payload[1],
            ])))),
        },
        opcode => Ok(FrameEvent::Unsupported { opcode, fin: true }),
    }
}
