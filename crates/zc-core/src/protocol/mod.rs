//! Wire formats: the HTTP upgrade handshake and the frame codec.

pub mod event;
pub mod frame;
pub mod handshake;

pub use event::{decode_event, FrameEvent};
pub use frame::{
    apply_mask, decode_frame, encode_close_frame, encode_frame, encode_text_frame, Decoded, Frame,
    FrameError, Opcode,
};
pub use handshake::{compute_accept_key, HandshakeError, RequestHead};
