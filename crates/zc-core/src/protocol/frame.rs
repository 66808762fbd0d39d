//! Binary codec for WebSocket frames (RFC 6455 §5.2).
//!
//! Wire format:
//! ```text
//! [fin:1][rsv:3][opcode:4][mask:1][len:7][ext_len:0|2|8][mask_key:0|4][payload:N]
//! ```
//! `len` is the payload length when below 126.  126 means "the next 2 bytes
//! hold the length", 127 means "the next 8 bytes hold the length".  All
//! multi-byte integers are big-endian.
//!
//! # What is masking? (for beginners)
//!
//! Every frame a browser sends is *masked*: the payload is XOR-ed with a
//! random 4-byte key that travels in the frame header.  This stops a hostile
//! page from crafting bytes that a caching proxy would mistake for an HTTP
//! response.  The server un-masks by XOR-ing with the same key again.
//! Frames sent by the server are never masked.
//!
//! # Partial input
//!
//! TCP is a stream protocol, so a buffer handed to [`decode_frame`] may hold
//! half a frame, exactly one frame, or several frames back to back.  The
//! decoder reports [`Decoded::Incomplete`] without consuming anything until
//! the whole frame is present, and otherwise returns the frame together with
//! the number of bytes it used.

use thiserror::Error;

/// Largest possible frame header: 2 fixed bytes + 8 length bytes + 4 mask bytes.
pub const MAX_HEADER_SIZE: usize = 14;

/// Control frames (close, ping, pong) may carry at most 125 payload bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Default ceiling for a single frame's payload (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// The close frame this server emits: fin=1, opcode=8, empty payload.
pub const CLOSE_FRAME: [u8; 2] = [0x88, 0x00];

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Errors that make a frame undecodable.
///
/// Every variant is fatal to the connection that produced the bytes; an
/// incomplete buffer is *not* an error (see [`Decoded::Incomplete`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The opcode nibble is one of the reserved values 0x3–0x7 or 0xB–0xF.
    #[error("reserved opcode: 0x{0:X}")]
    ReservedOpcode(u8),

    /// One of the RSV1–RSV3 bits is set but no extension was negotiated.
    #[error("reserved header bits set: 0x{0:02X}")]
    ReservedBits(u8),

    /// The 64-bit length has its top bit set or does not fit in `usize`.
    #[error("declared payload length {0} exceeds the addressable range")]
    OversizedLength(u64),

    /// The declared length is above the configured per-frame ceiling.
    #[error("declared payload length {declared} exceeds the {limit}-byte limit")]
    PayloadTooLarge { declared: u64, limit: usize },

    /// A close/ping/pong frame declared more than 125 payload bytes.
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLarge(usize),

    /// A close frame carried exactly one payload byte (a status code needs two).
    #[error("close frame payload of 1 byte cannot hold a status code")]
    MalformedClosePayload,

    /// A text frame's payload is not valid UTF-8.
    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,
}

/// WebSocket frame opcode (the low nibble of byte 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text message.
    Text = 0x1,
    /// Binary message.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Ping.
    Ping = 0x9,
    /// Pong.
    Pong = 0xA,
}

impl Opcode {
    /// Returns `true` for close, ping and pong.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::ReservedOpcode(other)),
        }
    }
}

/// One parsed WebSocket frame.
///
/// `payload` always holds the *unmasked* bytes; `mask_key` records the key
/// the frame travelled with (decoding) or should travel with (encoding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// `true` when this is the final fragment of a message.
    pub fin: bool,
    /// Frame type.
    pub opcode: Opcode,
    /// Masking key, present iff the mask bit is set.
    pub mask_key: Option<[u8; 4]>,
    /// Unmasked payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final, unmasked text frame.
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Text,
            mask_key: None,
            payload: text.as_bytes().to_vec(),
        }
    }

    /// A final, unmasked, empty close frame.
    #[must_use]
    pub fn close() -> Self {
        Self {
            fin: true,
            opcode: Opcode::Close,
            mask_key: None,
            payload: Vec::new(),
        }
    }

    /// Returns the same frame carrying `key` (as a client would send it).
    #[must_use]
    pub fn masked(mut self, key: [u8; 4]) -> Self {
        self.mask_key = Some(key);
        self
    }

    /// Returns `true` when the mask bit is (or will be) set.
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.mask_key.is_some()
    }
}

/// Result of a single [`decode_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes yet; nothing was consumed.
    Incomplete,
    /// One whole frame, and how many bytes of the input it occupied.
    Complete { frame: Frame, consumed: usize },
}

/// XORs `payload` in place with `key[i % 4]`.
///
/// Masking is its own inverse, so the same call masks and unmasks.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes one frame from the beginning of `bytes`.
///
/// Never reads past the end of `bytes`: when the header or the declared
/// payload is not fully buffered yet the result is [`Decoded::Incomplete`].
///
/// Length checks run on the header alone, so a peer that declares a huge
/// length is rejected before any of its payload has to be buffered.
///
/// # Errors
///
/// Returns [`FrameError`] for reserved opcodes or bits, lengths that are out
/// of range or above `max_payload_len`, and oversized control frames.
///
/// # Examples
///
/// ```rust
/// use zc_core::protocol::frame::{decode_frame, encode_frame, Decoded, Frame};
///
/// let bytes = encode_frame(&Frame::text("hi").masked([1, 2, 3, 4]));
/// match decode_frame(&bytes, 1024).unwrap() {
///     Decoded::Complete { frame, consumed } => {
///         assert_eq!(frame.payload, b"hi");
///         assert_eq!(consumed, bytes.len());
///     }
///     Decoded::Incomplete => unreachable!(),
/// }
/// ```
pub fn decode_frame(bytes: &[u8], max_payload_len: usize) -> Result<Decoded, FrameError> {
    if bytes.len() < 2 {
        return Ok(Decoded::Incomplete);
    }

    let b0 = bytes[0];
    let b1 = bytes[1];

    let rsv = b0 & RSV_BITS;
    if rsv != 0 {
        return Err(FrameError::ReservedBits(rsv));
    }
    let fin = b0 & FIN_BIT != 0;
    let opcode = Opcode::try_from(b0 & OPCODE_BITS)?;
    let masked = b1 & MASK_BIT != 0;

    let (declared, mut offset) = match b1 & LEN_BITS {
        LEN_16 => {
            if bytes.len() < 4 {
                return Ok(Decoded::Incomplete);
            }
            (u64::from(u16::from_be_bytes([bytes[2], bytes[3]])), 4)
        }
        LEN_64 => {
            if bytes.len() < 10 {
                return Ok(Decoded::Incomplete);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[2..10]);
            (u64::from_be_bytes(raw), 10)
        }
        short => (u64::from(short), 2),
    };

    // RFC 6455: the most significant bit of a 64-bit length must be 0.
    if declared >> 63 != 0 {
        return Err(FrameError::OversizedLength(declared));
    }
    let payload_len =
        usize::try_from(declared).map_err(|_| FrameError::OversizedLength(declared))?;

    if opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD {
        return Err(FrameError::ControlFrameTooLarge(payload_len));
    }
    if payload_len > max_payload_len {
        return Err(FrameError::PayloadTooLarge {
            declared,
            limit: max_payload_len,
        });
    }

    let mask_key = if masked {
        if bytes.len() < offset + 4 {
            return Ok(Decoded::Incomplete);
        }
        let key = [
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let end = offset
        .checked_add(payload_len)
        .ok_or(FrameError::OversizedLength(declared))?;
    if bytes.len() < end {
        return Ok(Decoded::Incomplete);
    }

    let mut payload = bytes[offset..end].to_vec();
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Decoded::Complete {
        frame: Frame {
            fin,
            opcode,
            mask_key,
            payload,
        },
        consumed: end,
    })
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes `frame` into one contiguous buffer.
///
/// When `frame.mask_key` is set the key is written after the length and the
/// payload is masked with it; otherwise the payload is copied verbatim.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut b0 = frame.opcode as u8;
    if frame.fin {
        b0 |= FIN_BIT;
    }

    let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + frame.payload.len());
    buf.push(b0);

    match frame.mask_key {
        Some(key) => {
            write_length(&mut buf, MASK_BIT, frame.payload.len());
            buf.extend_from_slice(&key);
            let start = buf.len();
            buf.extend_from_slice(&frame.payload);
            apply_mask(&mut buf[start..], key);
        }
        None => {
            write_length(&mut buf, 0, frame.payload.len());
            buf.extend_from_slice(&frame.payload);
        }
    }
    buf
}

/// Encodes `text` as a single unmasked server-to-client text frame.
///
/// The 64-bit length form is written in full, so payloads of 4 GiB and
/// above keep their exact length; the only ceiling is RFC 6455's 2^63-1.
///
/// # Examples
///
/// ```rust
/// use zc_core::protocol::frame::encode_text_frame;
///
/// assert_eq!(encode_text_frame("pong"), [0x81, 0x04, b'p', b'o', b'n', b'g']);
/// ```
#[must_use]
pub fn encode_text_frame(text: &str) -> Vec<u8> {
    let payload = text.as_bytes();
    let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + payload.len());
    buf.push(FIN_BIT | Opcode::Text as u8);
    write_length(&mut buf, 0, payload.len());
    buf.extend_from_slice(payload);
    buf
}

/// Returns the fixed empty close frame `0x88 0x00`.
#[must_use]
pub const fn encode_close_frame() -> [u8; 2] {
    CLOSE_FRAME
}

fn write_length(buf: &mut Vec<u8>, mask_bit: u8, len: usize) {
    if len < usize::from(LEN_16) {
        buf.push(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.push(mask_bit | LEN_16);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_bit | LEN_64);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
