//! Request routing and stream identity.
//!
//! The HTTP layer only understands two paths:
//!
//! | Path              | Route                                   |
//! |-------------------|-----------------------------------------|
//! | `/ws/<stream-id>` | WebSocket upgrade onto stream `stream-id` |
//! | `/health`         | JSON status document                    |
//!
//! Anything else is `404`.

use std::fmt;

use thiserror::Error;

/// Longest accepted stream identifier.
pub const MAX_STREAM_ID_LEN: usize = 64;

/// Why a path segment is not a usable [`StreamId`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamIdError {
    #[error("stream id is empty")]
    Empty,
    #[error("stream id is longer than {MAX_STREAM_ID_LEN} characters")]
    TooLong,
    #[error("stream id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// The logical stream (e.g. one terminal) a connection subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(String);

impl StreamId {
    /// Validates `raw`: 1–64 characters from `[A-Za-z0-9_-]`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamIdError`] describing the first violation.
    pub fn parse(raw: &str) -> Result<Self, StreamIdError> {
        if raw.is_empty() {
            return Err(StreamIdError::Empty);
        }
        if raw.len() > MAX_STREAM_ID_LEN {
            return Err(StreamIdError::TooLong);
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(StreamIdError::InvalidChar(bad));
        }
        Ok(Self(raw.to_string()))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Stream(StreamId),
    Health,
    NotFound,
}

/// Maps a request target to a [`Route`].  Query strings are ignored.
pub fn route(target: &str) -> Route {
    let path = target.split_once('?').map_or(target, |(p, _)| p);
    if path == "/health" {
        return Route::Health;
    }
    match path.strip_prefix("/ws/").map(StreamId::parse) {
        Some(Ok(id)) => Route::Stream(id),
        _ => Route::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_stream() {
        assert_eq!(
            route("/ws/term-1"),
            Route::Stream(StreamId::parse("term-1").unwrap())
        );
    }

    #[test]
    fn test_route_stream_ignores_query() {
        assert_eq!(
            route("/ws/build_log?token=abc"),
            Route::Stream(StreamId::parse("build_log").unwrap())
        );
    }

    #[test]
    fn test_route_health() {
        assert_eq!(route("/health"), Route::Health);
        assert_eq!(route("/health?verbose=1"), Route::Health);
    }

    #[test]
    fn test_route_unknown_paths() {
        assert_eq!(route("/"), Route::NotFound);
        assert_eq!(route("/ws/"), Route::NotFound);
        assert_eq!(route("/ws/a/b"), Route::NotFound);
        assert_eq!(route("/ws/../etc"), Route::NotFound);
    }

    #[test]
    fn test_stream_id_rules() {
        assert_eq!(StreamId::parse(""), Err(StreamIdError::Empty));
        assert_eq!(
            StreamId::parse(&"a".repeat(MAX_STREAM_ID_LEN + 1)),
            Err(StreamIdError::TooLong)
        );
        assert_eq!(StreamId::parse("a b"), Err(StreamIdError::InvalidChar(' ')));
        assert!(StreamId::parse(&"a".repeat(MAX_STREAM_ID_LEN)).is_ok());
    }

    #[test]
    fn test_stream_id_display() {
        assert_eq!(StreamId::parse("term-7").unwrap().to_string(), "term-7");
    }
}
