//! HTTP Upgrade handshake (RFC 6455 §4.2).
//!
//! A browser opens a WebSocket by sending an ordinary HTTP request:
//!
//! ```text
//! GET /ws/term-1 HTTP/1.1
//! Host: localhost:7681
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! and the server proves it understood the request by hashing the key:
//!
//! ```text
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! After the blank line that ends the response, both sides speak frames.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Fixed GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks.
pub const WS_VERSION: &str = "13";

/// Default ceiling for an HTTP request head (request line + headers).
pub const DEFAULT_MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Reasons an upgrade request is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// A header the upgrade needs is absent.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// `Sec-WebSocket-Key` is not base64 of exactly 16 bytes.
    #[error("invalid Sec-WebSocket-Key")]
    InvalidKey,

    /// The request line or a header line could not be parsed.
    #[error("malformed HTTP request: {0}")]
    MalformedRequest(String),

    /// Upgrades must use `GET`.
    #[error("upgrade method must be GET, got {0}")]
    MethodNotAllowed(String),

    /// `Upgrade`/`Connection` headers do not ask for a WebSocket.
    #[error("request does not ask for a WebSocket upgrade")]
    NotUpgrade,

    /// `Sec-WebSocket-Version` is not 13.
    #[error("unsupported WebSocket version: {0}")]
    UnsupportedVersion(String),

    /// The request head grew past the configured ceiling without ending.
    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },
}

impl HandshakeError {
    /// HTTP status code and reason phrase to answer this error with.
    #[must_use]
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            Self::MethodNotAllowed(_) => (405, "Method Not Allowed"),
            Self::UnsupportedVersion(_) => (426, "Upgrade Required"),
            Self::HeadTooLarge { .. } => (431, "Request Header Fields Too Large"),
            Self::MissingHeader(_)
            | Self::InvalidKey
            | Self::MalformedRequest(_)
            | Self::NotUpgrade => (400, "Bad Request"),
        }
    }
}

/// Computes `Sec-WebSocket-Accept` for a client key.
///
/// # Examples
///
/// ```rust
/// use zc_core::protocol::handshake::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Checks that `client_key` is base64 of a 16-byte nonce.
///
/// # Errors
///
/// Returns [`HandshakeError::InvalidKey`] otherwise.
pub fn validate_key(client_key: &str) -> Result<(), HandshakeError> {
    match BASE64.decode(client_key) {
        Ok(nonce) if nonce.len() == 16 => Ok(()),
        _ => Err(HandshakeError::InvalidKey),
    }
}

/// Builds the `101 Switching Protocols` response for `client_key`.
///
/// # Errors
///
/// Returns [`HandshakeError::InvalidKey`] when the key is malformed.
pub fn accept_response(client_key: &str) -> Result<Vec<u8>, HandshakeError> {
    validate_key(client_key)?;
    let accept = compute_accept_key(client_key);
    Ok(format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
    .into_bytes())
}

/// Builds the HTTP error response that refuses an upgrade.
#[must_use]
pub fn reject_response(err: &HandshakeError) -> Vec<u8> {
    let (status, reason) = err.status();
    let mut response = format!("HTTP/1.1 {status} {reason}\r\n");
    if matches!(err, HandshakeError::UnsupportedVersion(_)) {
        response.push_str("Sec-WebSocket-Version: ");
        response.push_str(WS_VERSION);
        response.push_str("\r\n");
    }
    response.push_str("Connection: close\r\nContent-Length: 0\r\n\r\n");
    response.into_bytes()
}

/// Returns the length of the request head (including the terminating blank
/// line) if `buf` already contains all of it.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// A parsed HTTP/1.1 request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target, e.g. `/ws/term-1`.
    pub path: String,
    /// Header names lower-cased, values trimmed, in arrival order.
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses a request head (everything up to and including `\r\n\r\n`).
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::MalformedRequest`] when the bytes are not
    /// UTF-8, the request line lacks a method, target or `HTTP/` version, or
    /// a header line has no colon.
    pub fn parse(head: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(head)
            .map_err(|_| HandshakeError::MalformedRequest("head is not UTF-8".into()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| HandshakeError::MalformedRequest("empty request line".into()))?;
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(HandshakeError::MalformedRequest(format!(
                "bad request line: {request_line}"
            )));
        };
        if !version.starts_with("HTTP/") {
            return Err(HandshakeError::MalformedRequest(format!(
                "bad HTTP version: {version}"
            )));
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                HandshakeError::MalformedRequest(format!("bad header line: {line}"))
            })?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
        })
    }

    /// Looks up a header by case-insensitive name (first occurrence wins).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` when the request carries `Upgrade: websocket`.
    #[must_use]
    pub fn wants_websocket(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    /// Checks everything an upgrade needs except the key itself, which the
    /// connection validates when it answers the handshake.
    ///
    /// # Errors
    ///
    /// Returns the [`HandshakeError`] describing the first problem found.
    pub fn validate_upgrade(&self) -> Result<(), HandshakeError> {
        if self.method != "GET" {
            return Err(HandshakeError::MethodNotAllowed(self.method.clone()));
        }
        if !self.wants_websocket() {
            return Err(HandshakeError::NotUpgrade);
        }
        let connection = self
            .header("connection")
            .ok_or(HandshakeError::MissingHeader("Connection"))?;
        if !connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        {
            return Err(HandshakeError::NotUpgrade);
        }
        let version = self
            .header("sec-websocket-version")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Version"))?;
        if version != WS_VERSION {
            return Err(HandshakeError::UnsupportedVersion(version.to_string()));
        }
        Ok(())
    }

    /// The raw `Sec-WebSocket-Key` value, if present.
    #[must_use]
    pub fn websocket_key(&self) -> Option<&str> {
        self.header("sec-websocket-key")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
