//! Outward-facing collaborator interfaces consumed by the session.
//!
//! The session never renders anything itself. It reports loading spans,
//! user-facing alerts and asks for the current user id through these traits.
//! The defaults only log.

use serde_json::Value;
use tracing::{debug, warn};

/// Loading-indicator sink. `start` may be called several times before a
/// single `end`; `end` fires when the last outstanding request resolves.
pub trait LoadingIndicator: Send {
    fn start(&mut self, text: &str);
    fn end(&mut self);
}

/// Receives classified error text for user-facing display.
pub trait AlertSink: Send {
    fn alert(&mut self, text: &str);
}

/// Supplies the id attached as `uid` to requests that require identity.
pub trait IdentityProvider: Send {
    fn user_id(&self) -> Option<Value>;
}

#[derive(Debug, Default)]
pub struct LogLoading;

impl LoadingIndicator for LogLoading {
    fn start(&mut self, text: &str) {
        debug!(%text, "loading: start");
    }

    fn end(&mut self) {
        debug!("loading: end");
    }
}

#[derive(Debug, Default)]
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alert(&mut self, text: &str) {
        warn!(%text, "alert");
    }
}

/// Identity provider with a fixed id, or none.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentity(pub Option<Value>);

impl IdentityProvider for StaticIdentity {
    fn user_id(&self) -> Option<Value> {
        self.0.clone()
    }
}

/// The full set of collaborators a session talks to.
pub struct Collaborators {
    pub loading: Box<dyn LoadingIndicator>,
    pub alerts: Box<dyn AlertSink>,
    pub identity: Box<dyn IdentityProvider>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            loading: Box::new(LogLoading),
            alerts: Box::new(LogAlerts),
            identity: Box::new(StaticIdentity::default()),
        }
    }
}

impl Collaborators {
    #[must_use]
    pub fn with_loading(mut self, loading: impl LoadingIndicator + 'static) -> Self {
        self.loading = Box::new(loading);
        self
    }

    #[must_use]
    pub fn with_alerts(mut self, alerts: impl AlertSink + 'static) -> Self {
        self.alerts = Box::new(alerts);
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: impl IdentityProvider + 'static) -> Self {
        self.identity = Box::new(identity);
        self
    }
}
