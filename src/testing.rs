//! Recording doubles shared by the unit tests.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::collaborators::{AlertSink, Collaborators, IdentityProvider, LoadingIndicator};
use crate::error::SessionError;
use crate::transport::Transport;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCall {
    Open(String),
    Close,
}

/// Transport that records every call. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub sent: Arc<Mutex<Vec<String>>>,
    pub calls: Arc<Mutex<Vec<TransportCall>>>,
    pub fail_sends: Arc<Mutex<bool>>,
}

impl RecordingTransport {
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .map(|text| serde_json::from_str(text).expect("sent frame is json"))
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn clear(&self) {
        self.sent.lock().expect("sent lock").clear();
    }
}

impl Transport for RecordingTransport {
    fn open(&mut self, url: &str) {
        self.calls.lock().expect("calls lock").push(TransportCall::Open(url.to_owned()));
    }

    fn close(&mut self) {
        self.calls.lock().expect("calls lock").push(TransportCall::Close);
    }

    fn send(&mut self, text: String) -> Result<(), SessionError> {
        if *self.fail_sends.lock().expect("fail lock") {
            return Err(SessionError::Transport("link down".into()));
        }
        self.sent.lock().expect("sent lock").push(text);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadingCall {
    Start(String),
    End,
}

#[derive(Clone, Default)]
pub struct RecordingLoading {
    pub calls: Arc<Mutex<Vec<LoadingCall>>>,
}

impl RecordingLoading {
    pub fn calls(&self) -> Vec<LoadingCall> {
        self.calls.lock().expect("loading lock").clone()
    }
}

impl LoadingIndicator for RecordingLoading {
    fn start(&mut self, text: &str) {
        self.calls.lock().expect("loading lock").push(LoadingCall::Start(text.to_owned()));
    }

    fn end(&mut self) {
        self.calls.lock().expect("loading lock").push(LoadingCall::End);
    }
}

#[derive(Clone, Default)]
pub struct RecordingAlerts {
    pub texts: Arc<Mutex<Vec<String>>>,
}

impl RecordingAlerts {
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().expect("alerts lock").clone()
    }
}

impl AlertSink for RecordingAlerts {
    fn alert(&mut self, text: &str) {
        self.texts.lock().expect("alerts lock").push(text.to_owned());
    }
}

#[derive(Clone)]
pub struct FixedIdentity(pub Value);

impl IdentityProvider for FixedIdentity {
    fn user_id(&self) -> Option<Value> {
        Some(self.0.clone())
    }
}

/// Collaborators wired to recorders, returned alongside handles to inspect them.
pub fn recording_collaborators() -> (Collaborators, RecordingLoading, RecordingAlerts) {
    let loading = RecordingLoading::default();
    let alerts = RecordingAlerts::default();
    let collaborators = Collaborators::default()
        .with_loading(loading.clone())
        .with_alerts(alerts.clone());
    (collaborators, loading, alerts)
}

/// Callback slot that records what it received.
#[derive(Clone)]
pub struct Slot<T> {
    pub value: Arc<Mutex<Option<T>>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self { value: Arc::new(Mutex::new(None)) }
    }
}

impl<T: Clone + Send + 'static> Slot<T> {
    pub fn setter(&self) -> Box<dyn FnOnce(T) + Send> {
        let value = Arc::clone(&self.value);
        Box::new(move |v| *value.lock().expect("slot lock") = Some(v))
    }

    pub fn get(&self) -> Option<T> {
        self.value.lock().expect("slot lock").clone()
    }
}
