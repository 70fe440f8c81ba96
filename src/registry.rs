//! Outstanding request bookkeeping and replay-on-reconnect.
//!
//! DESIGN
//! ======
//! - Every correlated call gets the next sequence index. Indices are unique
//!   for the registry's lifetime regardless of route, so the map is keyed by
//!   index and the route is checked on lookup.
//! - A `BTreeMap` keeps replay deterministic: oldest request first.
//! - The serialized frame is stored at enqueue time, so a replay resends
//!   byte-for-byte what the server saw the first time.
//! - Callbacks are `FnOnce`; removal happens before the callback runs, so a
//!   key can never resolve twice.

use std::collections::BTreeMap;
use std::fmt;

use frames::{OutboundFrame, ResponseFrame};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::classify;
use crate::collaborators::Collaborators;
use crate::error::{ErrorInfo, SessionError};
use crate::state::ConnectionState;
use crate::transport::Transport;

pub type SuccessCallback = Box<dyn FnOnce(Value) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(ErrorInfo) + Send>;

// =============================================================================
// KEY
// =============================================================================

/// `(route, index)` correlation key. Displays as `route:index`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    route: String,
    index: u64,
}

impl RequestKey {
    #[must_use]
    pub fn new(route: impl Into<String>, index: u64) -> Self {
        Self { route: route.into(), index }
    }

    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.route, self.index)
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

/// A correlated call as handed to [`RequestRegistry::enqueue`].
pub struct NewRequest {
    pub route: String,
    pub payload: Value,
    pub on_success: Option<SuccessCallback>,
    pub on_error: Option<ErrorCallback>,
    pub show_loading: bool,
    pub wait_text: String,
    /// Alert template rendered on failure (`{code}`, `{message}`).
    pub fail_text: Option<String>,
}

impl NewRequest {
    #[must_use]
    pub fn new(route: impl Into<String>, payload: Value) -> Self {
        Self {
            route: route.into(),
            payload,
            on_success: None,
            on_error: None,
            show_loading: false,
            wait_text: String::new(),
            fail_text: None,
        }
    }

    #[must_use]
    pub fn on_success(mut self, f: impl FnOnce(Value) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl FnOnce(ErrorInfo) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn loading(mut self, wait_text: impl Into<String>) -> Self {
        self.show_loading = true;
        self.wait_text = wait_text.into();
        self
    }

    #[must_use]
    pub fn fail_text(mut self, template: impl Into<String>) -> Self {
        self.fail_text = Some(template.into());
        self
    }
}

struct Request {
    route: String,
    frame: String,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    show_loading: bool,
    wait_text: String,
    fail_text: Option<String>,
    replays: u32,
}

impl Request {
    fn succeed(self, key: &RequestKey, data: Value) {
        match self.on_success {
            Some(f) => f(data),
            None => debug!(%key, %data, "registry: success with no callback"),
        }
    }

    fn fail(self, key: &RequestKey, info: ErrorInfo, collab: &mut Collaborators) {
        if let Some(template) = &self.fail_text {
            collab.alerts.alert(&classify::render_template(template, info.code(), info.message()));
        }
        match self.on_error {
            Some(f) => f(info),
            None => error!(%key, code = info.code(), message = info.message(), "registry: request failed"),
        }
    }
}

/// What a reconnect replay did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Keys retransmitted, in send order.
    pub replayed: Vec<RequestKey>,
    /// Keys dropped because they reached the replay cap.
    pub dropped: Vec<RequestKey>,
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Default)]
pub struct RequestRegistry {
    next_index: u64,
    requests: BTreeMap<u64, Request>,
    /// `None` replays forever.
    max_replays: Option<u32>,
}

impl RequestRegistry {
    #[must_use]
    pub fn new(max_replays: Option<u32>) -> Self {
        Self { next_index: 0, requests: BTreeMap::new(), max_replays }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// The index the next correlated call will receive.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    #[must_use]
    pub fn contains(&self, key: &RequestKey) -> bool {
        self.requests.get(&key.index).is_some_and(|req| req.route == key.route)
    }

    /// Outstanding keys in send order.
    pub fn keys(&self) -> impl Iterator<Item = RequestKey> + '_ {
        self.requests.iter().map(|(index, req)| RequestKey::new(req.route.clone(), *index))
    }

    /// Register and transmit a correlated request.
    ///
    /// A failed transmit keeps the request: it goes out again on the next
    /// reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] when `state` is not `Connected`;
    /// nothing is sent or stored in that case.
    pub fn enqueue(
        &mut self,
        state: ConnectionState,
        request: NewRequest,
        transport: &mut dyn Transport,
        collab: &mut Collaborators,
    ) -> Result<RequestKey, SessionError> {
        if state != ConnectionState::Connected {
            warn!(route = %request.route, ?state, "registry: enqueue while not connected");
            return Err(SessionError::NotConnected);
        }

        let index = self.next_index;
        self.next_index += 1;
        let key = RequestKey::new(request.route.clone(), index);

        let frame = frames::encode_outbound(&OutboundFrame::new(request.route.clone(), request.payload, index));
        info!(%key, "registry: send request");
        if let Err(e) = transport.send(frame.clone()) {
            warn!(%key, error = %e, "registry: send failed; request kept for replay");
        }
        if request.show_loading {
            collab.loading.start(&request.wait_text);
        }

        self.requests.insert(
            index,
            Request {
                route: request.route,
                frame,
                on_success: request.on_success,
                on_error: request.on_error,
                show_loading: request.show_loading,
                wait_text: request.wait_text,
                fail_text: request.fail_text,
                replays: 0,
            },
        );
        Ok(key)
    }

    /// Match a response to its request, remove it and run the callback.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RequestNotFound`] when no request is
    /// outstanding for `(route, index)`. No callback runs in that case.
    pub fn resolve(
        &mut self,
        response: ResponseFrame,
        collab: &mut Collaborators,
    ) -> Result<RequestKey, SessionError> {
        let ResponseFrame { route, index, status, errmsg, data } = response;
        let key = RequestKey::new(route, index);
        let Some(request) = self.take(&key) else {
            return Err(SessionError::RequestNotFound { route: key.route, index: key.index });
        };

        if self.requests.is_empty() {
            collab.loading.end();
        }

        debug!(%key, status, "registry: resolved");
        if status == 0 {
            request.succeed(&key, data);
        } else {
            let err = SessionError::Protocol { status, message: errmsg.unwrap_or_default() };
            request.fail(&key, ErrorInfo::from(err), collab);
        }
        Ok(key)
    }

    /// Drop an outstanding request without running either callback.
    pub fn cancel(&mut self, key: &RequestKey, collab: &mut Collaborators) -> bool {
        if self.take(key).is_none() {
            return false;
        }
        debug!(%key, "registry: cancelled");
        if self.requests.is_empty() {
            collab.loading.end();
        }
        true
    }

    /// Retransmit every outstanding request without removing it.
    ///
    /// Requests that already used their replay allowance are removed and
    /// failed with [`SessionError::ReplayExhausted`].
    pub fn replay_all(&mut self, transport: &mut dyn Transport, collab: &mut Collaborators) -> ReplayReport {
        let mut report = ReplayReport::default();

        let exhausted = match self.max_replays {
            Some(cap) => self
                .requests
                .iter()
                .filter(|(_, req)| req.replays >= cap)
                .map(|(index, _)| *index)
                .collect::<Vec<_>>(),
            None => Vec::new(),
        };
        for index in exhausted {
            let Some(request) = self.requests.remove(&index) else {
                continue;
            };
            let key = RequestKey::new(request.route.clone(), index);
            warn!(%key, attempts = request.replays, "registry: replay cap reached; dropping");
            let err = SessionError::ReplayExhausted { route: key.route.clone(), index, attempts: request.replays };
            request.fail(&key, ErrorInfo::from(err), collab);
            report.dropped.push(key);
        }

        for (index, request) in &mut self.requests {
            let key = RequestKey::new(request.route.clone(), *index);
            request.replays += 1;
            info!(%key, attempt = request.replays, "registry: replay request");
            if let Err(e) = transport.send(request.frame.clone()) {
                warn!(%key, error = %e, "registry: replay send failed");
            }
            if request.show_loading {
                collab.loading.start(&request.wait_text);
            }
            report.replayed.push(key);
        }

        if !report.dropped.is_empty() && self.requests.is_empty() {
            collab.loading.end();
        }
        report
    }

    /// Transmit a frame with no correlation entry.
    ///
    /// The frame carries the current counter value as `index`; the counter is
    /// not advanced.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] when `state` is not `Connected`,
    /// or the transport's error if the send itself fails.
    pub fn send_untracked(
        &self,
        state: ConnectionState,
        route: &str,
        payload: Value,
        transport: &mut dyn Transport,
    ) -> Result<(), SessionError> {
        if state != ConnectionState::Connected {
            warn!(%route, ?state, "registry: fire-and-forget while not connected");
            return Err(SessionError::NotConnected);
        }
        let frame = frames::encode_outbound(&OutboundFrame::new(route, payload, self.next_index));
        debug!(%route, "registry: send fire-and-forget");
        transport.send(frame)
    }

    fn take(&mut self, key: &RequestKey) -> Option<Request> {
        if !self.contains(key) {
            return None;
        }
        self.requests.remove(&key.index)
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
