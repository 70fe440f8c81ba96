//! Error taxonomy and the `ErrorInfo` value delivered through callbacks.
//!
//! DESIGN
//! ======
//! Nothing in the session layer throws into caller code. Every failure either
//! comes back as a `Result<_, SessionError>` from a synchronous refusal, or
//! is converted to an [`ErrorInfo`] and handed to a callback.

use std::fmt;

use crate::state::ConnectionState;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Transport gave no response (also the default code for socket errors).
pub const CODE_NO_RESPONSE: i32 = -1;

/// Server closed the connection during the handshake.
pub const CODE_SERVER_DISCONNECTED: i32 = 101;

/// Close code for an internal server error.
pub const CODE_SERVER_ERROR: i32 = 1011;

/// Client-side codes. Kept clear of HTTP/websocket close-code ranges.
pub const CODE_NOT_CONNECTED: i32 = 600;
pub const CODE_REQUEST_NOT_FOUND: i32 = 601;
pub const CODE_MALFORMED_FRAME: i32 = 602;
pub const CODE_REPLAY_EXHAUSTED: i32 = 603;
pub const CODE_INVALID_TRANSITION: i32 = 604;
pub const CODE_HANDLER_EXISTS: i32 = 605;
pub const CODE_CONFIG: i32 = 606;
pub const CODE_SHUTDOWN: i32 = 607;

// =============================================================================
// ERROR INFO
// =============================================================================

/// Numeric code plus human-readable message. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorInfo {
    code: i32,
    message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    #[must_use]
    pub fn code(&self) -> i32 {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// =============================================================================
// SESSION ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Connection-level failure with no frame involved.
    #[error("transport error: {0}")]
    Transport(String),
    /// A response carried `status > 0`.
    #[error("request failed with status {status}: {message}")]
    Protocol { status: i32, message: String },
    /// A response referenced an unknown or already-resolved key.
    #[error("no outstanding request for {route}:{index}")]
    RequestNotFound { route: String, index: u64 },
    /// A send was attempted while not connected.
    #[error("not connected")]
    NotConnected,
    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] frames::CodecError),
    /// A lifecycle call was made from a state that does not allow it.
    #[error("cannot {action} while {from:?}")]
    InvalidTransition { from: ConnectionState, action: &'static str },
    /// A push handler is already registered for this type.
    #[error("handler already registered for push type `{0}`")]
    HandlerExists(String),
    /// The request hit its replay cap without being answered.
    #[error("request {route}:{index} dropped after {attempts} replays")]
    ReplayExhausted { route: String, index: u64, attempts: u32 },
    /// Session configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
    /// The session event loop has stopped.
    #[error("session shut down")]
    Shutdown,
}

impl SessionError {
    /// Stable numeric code for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Transport(_) => CODE_NO_RESPONSE,
            Self::Protocol { status, .. } => *status,
            Self::RequestNotFound { .. } => CODE_REQUEST_NOT_FOUND,
            Self::NotConnected => CODE_NOT_CONNECTED,
            Self::MalformedFrame(_) => CODE_MALFORMED_FRAME,
            Self::InvalidTransition { .. } => CODE_INVALID_TRANSITION,
            Self::HandlerExists(_) => CODE_HANDLER_EXISTS,
            Self::ReplayExhausted { .. } => CODE_REPLAY_EXHAUSTED,
            Self::Config(_) => CODE_CONFIG,
            Self::Shutdown => CODE_SHUTDOWN,
        }
    }
}

impl From<&SessionError> for ErrorInfo {
    fn from(err: &SessionError) -> Self {
        match err {
            // Server-supplied text passes through untouched.
            SessionError::Protocol { status, message } => Self::new(*status, message.clone()),
            other => Self::new(other.code(), other.to_string()),
        }
    }
}

impl From<SessionError> for ErrorInfo {
    fn from(err: SessionError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
