//! The session: one connection, its outstanding requests and push handlers.
//!
//! DESIGN
//! ======
//! `Session` is a plain owned value. It holds the state machine, request
//! registry, push router, transport and collaborators, and is driven by
//! explicit calls: the caller's operations (`connect`, `enqueue`, ...) and
//! the transport's events (`on_open`, `on_close`, `on_error`, `dispatch`).
//! It never spawns, sleeps or blocks; [`crate::runtime`] owns the async side.
//!
//! Alerts: unrequested drops alert the classified message. A drop the user
//! asked for only records it.

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::classify;
use crate::collaborators::Collaborators;
use crate::config::{RequestOptions, SessionConfig};
use crate::error::{ErrorInfo, SessionError};
use crate::registry::{NewRequest, ReplayReport, RequestKey, RequestRegistry};
use crate::router::{EventRouter, PushErrorSink};
use crate::state::{ConnectionState, ConnectionStateMachine};
use crate::transport::Transport;

/// Receives errors for responses that matched no outstanding request.
pub type UnmatchedHandler = Box<dyn FnMut(ErrorInfo) + Send>;

pub struct Session {
    pub(crate) url: String,
    pub(crate) state: ConnectionStateMachine,
    pub(crate) registry: RequestRegistry,
    pub(crate) router: EventRouter,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) collaborators: Collaborators,
    pub(crate) unmatched: UnmatchedHandler,
}

impl Session {
    #[must_use]
    pub fn new(config: &SessionConfig, transport: Box<dyn Transport>, collaborators: Collaborators) -> Self {
        Self {
            url: config.url.clone(),
            state: ConnectionStateMachine::new(),
            registry: RequestRegistry::new(config.max_replays),
            router: EventRouter::new(),
            transport,
            collaborators,
            unmatched: Box::new(log_unmatched),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    /// Why the last disconnect happened, if it carried a code.
    #[must_use]
    pub fn info(&self) -> Option<&ErrorInfo> {
        self.state.info()
    }

    /// Server-assigned channel id from the last `session-linked` push.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.router.channel()
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn pending_keys(&self) -> Vec<RequestKey> {
        self.registry.keys().collect()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Start connecting to the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] unless `Disconnected`.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        self.state.connect()?;
        info!(url = %self.url, "session: connecting");
        self.transport.open(&self.url);
        Ok(())
    }

    /// Start a user-requested disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] unless `Connected`.
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        self.state.disconnect()?;
        info!("session: disconnecting");
        self.transport.close();
        Ok(())
    }

    /// Transport opened. Replays every outstanding request.
    pub fn on_open(&mut self) -> ReplayReport {
        if !self.state.on_open() {
            return ReplayReport::default();
        }
        let report = self.registry.replay_all(self.transport.as_mut(), &mut self.collaborators);
        if !report.replayed.is_empty() || !report.dropped.is_empty() {
            info!(replayed = report.replayed.len(), dropped = report.dropped.len(), "session: replayed requests");
        }
        report
    }

    /// Transport closed.
    pub fn on_close(&mut self, code: Option<i32>, reason: &str) {
        let Some(requested) = self.begin_terminal("close") else {
            return;
        };
        self.state.on_close(code, reason);
        self.finish_terminal(requested);
    }

    /// Transport failed to open or broke.
    pub fn on_error(&mut self, code: Option<i32>, message: &str) {
        let Some(requested) = self.begin_terminal("error") else {
            return;
        };
        self.state.on_error(code, message);
        self.finish_terminal(requested);
    }

    /// The server told us this session is gone.
    pub(crate) fn on_server_disconnect(&mut self, code: i32, message: &str) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        self.state.on_close(Some(code), message);
        self.transport.close();
        self.finish_terminal(false);
    }

    /// `None` when already disconnected: the first terminal reason wins.
    fn begin_terminal(&self, what: &'static str) -> Option<bool> {
        match self.state() {
            ConnectionState::Disconnected => {
                debug!(what, "session: terminal event while disconnected; ignored");
                None
            }
            state => Some(state == ConnectionState::Disconnecting),
        }
    }

    fn finish_terminal(&mut self, requested: bool) {
        if requested {
            return;
        }
        if let Some(info) = self.state.info() {
            self.collaborators.alerts.alert(info.message());
        }
    }

    // =========================================================================
    // REQUESTS
    // =========================================================================

    /// Send a correlated request. Exactly one of the callbacks will run,
    /// unless the request is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] when not `Connected`. Neither
    /// callback runs in that case.
    pub fn enqueue(
        &mut self,
        route: &str,
        payload: Value,
        on_success: impl FnOnce(Value) + Send + 'static,
        on_error: impl FnOnce(ErrorInfo) + Send + 'static,
        options: &RequestOptions,
    ) -> Result<RequestKey, SessionError> {
        let mut request = NewRequest::new(route, self.prepare_payload(route, payload, options))
            .on_success(on_success)
            .on_error(on_error);
        if options.show_loading {
            request = request.loading(options.wait_text.clone());
        }
        if let Some(template) = &options.fail_text_template {
            request = request.fail_text(template.clone());
        }
        self.submit(request)
    }

    /// Lower-level [`Session::enqueue`] for a fully built request.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] when not `Connected`. The
    /// request's fail text, if any, is alerted for the refusal too.
    pub fn submit(&mut self, request: NewRequest) -> Result<RequestKey, SessionError> {
        let fail_text = request.fail_text.clone();
        let result = self
            .registry
            .enqueue(self.state.state(), request, self.transport.as_mut(), &mut self.collaborators);
        if let Err(e) = &result {
            self.alert_refused(fail_text.as_deref(), e);
        }
        result
    }

    /// Fire-and-forget: nothing is tracked and no callback ever runs.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] when not `Connected`, or the
    /// transport's error.
    pub fn send(&mut self, route: &str, payload: Value, options: &RequestOptions) -> Result<(), SessionError> {
        let payload = self.prepare_payload(route, payload, options);
        let result = self
            .registry
            .send_untracked(self.state.state(), route, payload, self.transport.as_mut());
        if let Err(e) = &result {
            self.alert_refused(options.fail_text_template.as_deref(), e);
        }
        result
    }

    fn alert_refused(&mut self, fail_text: Option<&str>, err: &SessionError) {
        let Some(template) = fail_text else {
            return;
        };
        let info = ErrorInfo::from(err);
        self.collaborators
            .alerts
            .alert(&classify::render_template(template, info.code(), info.message()));
    }

    /// Drop an outstanding request. Neither callback will run.
    pub fn cancel(&mut self, key: &RequestKey) -> bool {
        self.registry.cancel(key, &mut self.collaborators)
    }

    fn prepare_payload(&self, route: &str, payload: Value, options: &RequestOptions) -> Value {
        if !options.requires_identity {
            return payload;
        }
        let Some(uid) = self.collaborators.identity.user_id() else {
            warn!(%route, "session: identity required but none available");
            return payload;
        };
        match payload {
            Value::Object(mut map) => {
                map.insert("uid".to_owned(), uid);
                Value::Object(map)
            }
            Value::Null => {
                let mut map = Map::new();
                map.insert("uid".to_owned(), uid);
                Value::Object(map)
            }
            other => {
                warn!(%route, "session: cannot attach uid to non-object payload");
                other
            }
        }
    }

    // =========================================================================
    // PUSH HANDLERS
    // =========================================================================

    /// Register the handler for one push type.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HandlerExists`] if the type already has one.
    pub fn on(&mut self, kind: &str, handler: impl FnMut(&Value) + Send + 'static) -> Result<(), SessionError> {
        self.router.register(kind, Box::new(handler))
    }

    /// Install or overwrite a handler. Returns `true` when one was replaced.
    pub fn replace_handler(&mut self, kind: &str, handler: impl FnMut(&Value) + Send + 'static) -> bool {
        self.router.replace(kind, Box::new(handler))
    }

    pub fn remove_handler(&mut self, kind: &str) -> bool {
        self.router.unregister(kind)
    }

    /// Where pushes flagged as failed are reported.
    pub fn set_push_error_sink(&mut self, sink: PushErrorSink) {
        self.router.set_error_sink(sink);
    }

    /// Where responses with no matching request are reported.
    pub fn set_unmatched_handler(&mut self, handler: impl FnMut(ErrorInfo) + Send + 'static) {
        self.unmatched = Box::new(handler);
    }
}

fn log_unmatched(info: ErrorInfo) {
    error!(code = info.code(), message = info.message(), "session: response without request");
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
