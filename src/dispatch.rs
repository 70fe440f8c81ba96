//! Inbound frame dispatch.
//!
//! `response` frames resolve a request through the registry. `emit` frames
//! go through the push router, whose outcome the session then applies.
//! Frames that fail to decode are logged and dropped; they never reach a
//! callback.

use frames::InboundFrame;
use tracing::{debug, warn};

use crate::error::{ErrorInfo, SessionError};
use crate::registry::RequestKey;
use crate::router::{PushEvent, RouteOutcome};
use crate::session::Session;

/// What handling one inbound frame did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A response resolved this request.
    Resolved(RequestKey),
    /// A response matched no outstanding request.
    Unmatched(ErrorInfo),
    /// A push was routed.
    Push(RouteOutcome),
    /// The frame did not decode.
    Malformed(ErrorInfo),
}

impl Session {
    pub fn dispatch_text(&mut self, text: &str) -> DispatchOutcome {
        match frames::decode_inbound(text) {
            Ok(frame) => self.dispatch(frame),
            Err(e) => malformed(e.into(), text.len()),
        }
    }

    pub fn dispatch_bytes(&mut self, bytes: &[u8]) -> DispatchOutcome {
        match frames::decode_inbound_bytes(bytes) {
            Ok(frame) => self.dispatch(frame),
            Err(e) => malformed(e.into(), bytes.len()),
        }
    }

    pub fn dispatch(&mut self, frame: InboundFrame) -> DispatchOutcome {
        match frame {
            InboundFrame::Response(response) => match self.registry.resolve(response, &mut self.collaborators) {
                Ok(key) => DispatchOutcome::Resolved(key),
                Err(err) => {
                    let info = ErrorInfo::from(&err);
                    (self.unmatched)(info.clone());
                    DispatchOutcome::Unmatched(info)
                }
            },
            InboundFrame::Emit(emit) => {
                let outcome = self.router.route(PushEvent::from(emit));
                if let RouteOutcome::SelfDisconnect { code, message } = &outcome {
                    self.on_server_disconnect(*code, message);
                }
                debug!(?outcome, "dispatch: push routed");
                DispatchOutcome::Push(outcome)
            }
        }
    }
}

fn malformed(err: SessionError, len: usize) -> DispatchOutcome {
    warn!(error = %err, len, "dispatch: dropping malformed frame");
    DispatchOutcome::Malformed(ErrorInfo::from(err))
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
