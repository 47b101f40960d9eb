//! Error types for RES client operations.
//!
//! All fallible operations in this crate return [`Result`]. Server-originated
//! errors are passed through verbatim as [`Error::Remote`], keeping the
//! gateway's `code`, `message` and optional `data` intact. Every variant maps
//! to a wire error code via [`Error::code`].

use crate::types::ErrorPayload;
use thiserror::Error;

/// Result type for RES client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a RES gateway.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The connection was closed by an explicit `disconnect` call.
    #[error("connection disconnected")]
    Disconnect,

    /// The transport failed to open, or closed while work was outstanding.
    #[error("connection error: {0}")]
    Connection(String),

    /// An error returned by the gateway or a service behind it.
    ///
    /// The `code` is the dot-separated error identifier from the wire
    /// (e.g. `system.notFound`), passed through unmodified.
    #[error("{code}: {message}")]
    Remote {
        code: String,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The public API was called with an invalid argument, such as an empty
    /// resource id or an empty method name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The targeted resource is not in the cache.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The gateway violated the protocol: a response without a matching
    /// request, a malformed event subject, or an unsupported value shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Network I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket-level failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// The wire error code for this error.
    ///
    /// Server-originated errors keep their own code; local errors use the
    /// `system.*` codes the protocol reserves for client-side conditions.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Error::Disconnect => "system.disconnect",
            Error::Connection(_) | Error::Io(_) | Error::WebSocket(_) => "system.connectionError",
            Error::Remote { code, .. } => code,
            Error::InvalidArgument(_) => "system.invalidParams",
            Error::NotFound(_) => "system.notFound",
            Error::Protocol(_) | Error::Json(_) => "system.internalError",
        }
    }

    /// Whether this error was caused by an explicit disconnect.
    #[inline]
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::Disconnect)
    }

    /// Clone-like projection used when one failure must be delivered to
    /// several waiters. Variants wrapping non-cloneable sources degrade to
    /// their message text.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Disconnect => Error::Disconnect,
            Error::Connection(s) => Error::Connection(s.clone()),
            Error::Remote {
                code,
                message,
                data,
            } => Error::Remote {
                code: code.clone(),
                message: message.clone(),
                data: data.clone(),
            },
            Error::InvalidArgument(s) => Error::InvalidArgument(s.clone()),
            Error::NotFound(s) => Error::NotFound(s.clone()),
            Error::Protocol(s) => Error::Protocol(s.clone()),
            Error::Json(e) => Error::Protocol(e.to_string()),
            Error::Io(e) => Error::Connection(e.to_string()),
            Error::WebSocket(e) => Error::Connection(e.to_string()),
        }
    }
}

impl From<ErrorPayload> for Error {
    fn from(payload: ErrorPayload) -> Self {
        Error::Remote {
            code: payload.code,
            message: payload.message,
            data: payload.data,
        }
    }
}
