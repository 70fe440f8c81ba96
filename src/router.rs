//! Push-event routing.
//!
//! DESIGN
//! ======
//! One handler per push type. A second `register` for the same type is
//! rejected; `replace` is the explicit overwrite.
//!
//! Two reserved types are handled here whenever nobody registered for them:
//! - `session-linked` records the server-assigned channel id.
//! - `peer-disconnected` compares the channel against our own. A match means
//!   the server dropped *us*; the outcome tells the session to disconnect.
//!   Anything else is a peer leaving and is informational only.
//!
//! The router never touches connection state itself; it reports a
//! [`RouteOutcome`] and the session applies it.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{CODE_NO_RESPONSE, ErrorInfo, SessionError};

pub const SESSION_LINKED: &str = "session-linked";
pub const PEER_DISCONNECTED: &str = "peer-disconnected";

pub type PushHandler = Box<dyn FnMut(&Value) + Send>;
pub type PushErrorSink = Box<dyn FnMut(&str, &ErrorInfo) + Send>;

/// Transient unsolicited server message.
#[derive(Clone, Debug, PartialEq)]
pub struct PushEvent {
    pub kind: String,
    pub data: Value,
    /// Set when the server flagged the push as failed (`status > 0`).
    pub failure: Option<ErrorInfo>,
}

impl PushEvent {
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self { kind: kind.into(), data, failure: None }
    }
}

impl From<frames::EmitFrame> for PushEvent {
    fn from(emit: frames::EmitFrame) -> Self {
        let failure = emit
            .is_failure()
            .then(|| ErrorInfo::new(emit.status, emit.errmsg.clone().unwrap_or_default()));
        Self { kind: emit.kind, data: emit.data, failure }
    }
}

/// What routing a push did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A registered handler ran.
    Handled { kind: String },
    /// The failure went to the error sink.
    Failed { kind: String, error: ErrorInfo },
    /// Built-in `session-linked`: own channel id recorded.
    Linked { channel: String },
    /// Built-in `peer-disconnected` naming our own channel.
    SelfDisconnect { code: i32, message: String },
    /// Built-in `peer-disconnected` naming someone else.
    PeerDisconnected { channel: String, code: i32, message: String },
    /// A reserved push arrived without the fields it needs.
    InvalidPayload { kind: String },
    /// No handler for this type.
    Unhandled { kind: String },
}

pub struct EventRouter {
    handlers: HashMap<String, PushHandler>,
    error_sink: PushErrorSink,
    channel: Option<String>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    #[must_use]
    pub fn new() -> Self {
        Self { handlers: HashMap::new(), error_sink: Box::new(log_push_failure), channel: None }
    }

    /// Channel id assigned by the server, once linked.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    #[must_use]
    pub fn is_registered(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Register the handler for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HandlerExists`] if a handler is already
    /// registered for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, handler: PushHandler) -> Result<(), SessionError> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(SessionError::HandlerExists(kind));
        }
        debug!(%kind, "router: handler registered");
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Install `handler` for `kind`, dropping any previous one. Returns
    /// whether a handler was replaced.
    pub fn replace(&mut self, kind: impl Into<String>, handler: PushHandler) -> bool {
        self.handlers.insert(kind.into(), handler).is_some()
    }

    pub fn unregister(&mut self, kind: &str) -> bool {
        self.handlers.remove(kind).is_some()
    }

    /// Replace the sink that receives failed pushes.
    pub fn set_error_sink(&mut self, sink: PushErrorSink) {
        self.error_sink = sink;
    }

    pub fn route(&mut self, event: PushEvent) -> RouteOutcome {
        let PushEvent { kind, data, failure } = event;

        if let Some(error) = failure {
            (self.error_sink)(&kind, &error);
            return RouteOutcome::Failed { kind, error };
        }

        if let Some(handler) = self.handlers.get_mut(&kind) {
            debug!(%kind, "router: dispatch push");
            handler(&data);
            return RouteOutcome::Handled { kind };
        }

        match kind.as_str() {
            SESSION_LINKED => self.link(&data),
            PEER_DISCONNECTED => self.peer_disconnected(&data),
            _ => {
                debug!(%kind, "router: no handler for push");
                RouteOutcome::Unhandled { kind }
            }
        }
    }

    fn link(&mut self, data: &Value) -> RouteOutcome {
        let Some(channel) = data.get("channel").and_then(Value::as_str) else {
            warn!(%data, "router: session-linked without channel");
            return RouteOutcome::InvalidPayload { kind: SESSION_LINKED.to_owned() };
        };
        info!(%channel, "router: session linked");
        self.channel = Some(channel.to_owned());
        RouteOutcome::Linked { channel: channel.to_owned() }
    }

    fn peer_disconnected(&self, data: &Value) -> RouteOutcome {
        let Some(channel) = data.get("channel").and_then(Value::as_str) else {
            warn!(%data, "router: peer-disconnected without channel");
            return RouteOutcome::InvalidPayload { kind: PEER_DISCONNECTED.to_owned() };
        };
        let code = data
            .get("code")
            .and_then(Value::as_i64)
            .and_then(|c| i32::try_from(c).ok())
            .unwrap_or(CODE_NO_RESPONSE);
        let message = data.get("message").and_then(Value::as_str).unwrap_or_default().to_owned();

        if self.channel.as_deref() == Some(channel) {
            warn!(%channel, code, %message, "router: server disconnected this session");
            RouteOutcome::SelfDisconnect { code, message }
        } else {
            info!(%channel, code, %message, "router: peer disconnected");
            RouteOutcome::PeerDisconnected { channel: channel.to_owned(), code, message }
        }
    }
}

fn log_push_failure(kind: &str, error: &ErrorInfo) {
    error!(%kind, code = error.code(), message = error.message(), "router: push failed");
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
