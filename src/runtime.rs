//! Async runtime: one tokio task owns the [`Session`].
//!
//! DESIGN
//! ======
//! Every operation is a [`Command`] sent over an unbounded channel to a
//! single event loop that also drains link events and the reconnect timer.
//! Callbacks, push handlers and state changes therefore all run on one task,
//! in arrival order, and no lock guards any session state.
//!
//! [`SessionHandle`] is the cheap, cloneable front door. Its methods queue a
//! command and await the loop's reply; none of them block a thread.
//!
//! Reconnect
//! ---------
//! After an unrequested drop the loop reconnects with exponential backoff
//! (with up to 25% random jitter), doubling from the policy's initial delay
//! to its cap. A user `disconnect` or a server-side `peer-disconnected` for
//! our own channel turns auto-reconnect off until the next `connect`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collaborators::Collaborators;
use crate::config::{ReconnectPolicy, RequestOptions, SessionConfig};
use crate::dispatch::DispatchOutcome;
use crate::error::{CODE_NO_RESPONSE, ErrorInfo, SessionError};
use crate::registry::{ErrorCallback, RequestKey, SuccessCallback};
use crate::router::{PushHandler, RouteOutcome};
use crate::session::Session;
use crate::state::ConnectionState;
use crate::transport::{LinkEvent, LinkEvents, WsTransport, sleep_until};

const NOTICE_CAPACITY: usize = 64;

// =============================================================================
// TYPES
// =============================================================================

/// Broadcast to every [`SessionHandle::notices`] subscriber.
///
/// Notices are an observation stream: published after the session has
/// already acted, with nothing waiting on them and no user code invoked.
/// Push handlers, the unmatched handler and the push error sink are the
/// only callbacks a frame can reach.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionNotice {
    StateChanged { state: ConnectionState, info: Option<ErrorInfo> },
    /// The built-in `session-linked` push recorded this channel id. No push
    /// handler runs for it; this is the same id [`SessionSnapshot::channel`]
    /// reports.
    Linked { channel: String },
    PeerDisconnected { channel: String, code: i32, message: String },
    PushFailed { kind: String, error: ErrorInfo },
    ReconnectScheduled { attempt: u32, delay: Duration },
}

/// Point-in-time view of the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub info: Option<ErrorInfo>,
    pub channel: Option<String>,
    pub outstanding: usize,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Connect(Reply<Result<(), SessionError>>),
    Disconnect(Reply<Result<(), SessionError>>),
    Enqueue {
        route: String,
        payload: Value,
        on_success: SuccessCallback,
        on_error: ErrorCallback,
        options: RequestOptions,
        reply: Reply<Result<RequestKey, SessionError>>,
    },
    Send {
        route: String,
        payload: Value,
        options: RequestOptions,
        reply: Reply<Result<(), SessionError>>,
    },
    Cancel { key: RequestKey, reply: Reply<bool> },
    Register { kind: String, handler: PushHandler, reply: Reply<Result<(), SessionError>> },
    Replace { kind: String, handler: PushHandler, reply: Reply<bool> },
    Remove { kind: String, reply: Reply<bool> },
    Snapshot(Reply<SessionSnapshot>),
    Shutdown,
}

// =============================================================================
// SPAWN
// =============================================================================

/// Start a session over a websocket transport. The session starts
/// `Disconnected`; call [`SessionHandle::connect`].
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`SessionError::Config`] when the configuration is invalid.
pub fn spawn(config: SessionConfig, collaborators: Collaborators) -> Result<SessionHandle, SessionError> {
    config.validate()?;
    let (transport, links) = WsTransport::with_timeouts(config.timeouts);
    let session = Session::new(&config, Box::new(transport), collaborators);
    Ok(spawn_session(session, links, config.reconnect))
}

pub(crate) fn spawn_session(session: Session, links: LinkEvents, reconnect: Option<ReconnectPolicy>) -> SessionHandle {
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(session.state());
    let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

    let driver = Driver {
        session,
        links,
        commands,
        backoff: reconnect.map(Backoff::new),
        reconnect_at: None,
        auto_reconnect: true,
        state_tx,
        notices: notices.clone(),
    };
    tokio::spawn(driver.run());

    SessionHandle { commands: commands_tx, state: state_rx, notices }
}

// =============================================================================
// HANDLE
// =============================================================================

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] unless `Disconnected`.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(Command::Connect).await?
    }

    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] unless `Connected`.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(Command::Disconnect).await?
    }

    /// Queue a correlated request. Exactly one callback runs later, on the
    /// session task.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] when not `Connected`.
    pub async fn enqueue(
        &self,
        route: &str,
        payload: Value,
        on_success: impl FnOnce(Value) + Send + 'static,
        on_error: impl FnOnce(ErrorInfo) + Send + 'static,
        options: RequestOptions,
    ) -> Result<RequestKey, SessionError> {
        self.request(|reply| Command::Enqueue {
            route: route.to_owned(),
            payload,
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
            options,
            reply,
        })
        .await?
    }

    /// Send a request and await its outcome. A fire-and-forget `options`
    /// resolves to `null` as soon as the frame is queued.
    ///
    /// # Errors
    ///
    /// Returns the server's error, or a client-side [`ErrorInfo`] when the
    /// request could not be sent or was dropped.
    pub async fn call(&self, route: &str, payload: Value, options: RequestOptions) -> Result<Value, ErrorInfo> {
        if options.fire_and_forget {
            self.send(route, payload, options).await.map_err(ErrorInfo::from)?;
            return Ok(Value::Null);
        }
        let (slot, rx) = reply_slot();
        let key = self
            .enqueue(route, payload, success_to(&slot), error_to(&slot), options)
            .await
            .map_err(ErrorInfo::from)?;
        debug!(%key, "session: awaiting response");
        rx.await.unwrap_or_else(|_| Err(dropped()))
    }

    /// [`SessionHandle::call`] with a deadline. On timeout the request is
    /// cancelled so a late response runs nothing.
    ///
    /// # Errors
    ///
    /// As [`SessionHandle::call`], plus a [`CODE_NO_RESPONSE`] error on timeout.
    pub async fn call_timeout(
        &self,
        route: &str,
        payload: Value,
        options: RequestOptions,
        timeout: Duration,
    ) -> Result<Value, ErrorInfo> {
        if options.fire_and_forget {
            return self.call(route, payload, options).await;
        }
        let (slot, rx) = reply_slot();
        let key = self
            .enqueue(route, payload, success_to(&slot), error_to(&slot), options)
            .await
            .map_err(ErrorInfo::from)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(result) => result.unwrap_or_else(|_| Err(dropped())),
            Err(_) => {
                warn!(%key, ?timeout, "session: request timed out");
                self.cancel(&key).await;
                Err(ErrorInfo::new(CODE_NO_RESPONSE, format!("no response to {key} within {timeout:?}")))
            }
        }
    }

    /// Fire-and-forget send.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] when not `Connected`.
    pub async fn send(&self, route: &str, payload: Value, options: RequestOptions) -> Result<(), SessionError> {
        self.request(|reply| Command::Send { route: route.to_owned(), payload, options, reply })
            .await?
    }

    /// Drop an outstanding request. `false` if it was not outstanding.
    pub async fn cancel(&self, key: &RequestKey) -> bool {
        self.request(|reply| Command::Cancel { key: key.clone(), reply })
            .await
            .unwrap_or(false)
    }

    /// Register the handler for one push type. Handlers run on the session
    /// task and must not block.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HandlerExists`] if the type already has one.
    pub async fn on(&self, kind: &str, handler: impl FnMut(&Value) + Send + 'static) -> Result<(), SessionError> {
        self.request(|reply| Command::Register { kind: kind.to_owned(), handler: Box::new(handler), reply })
            .await?
    }

    /// Install or overwrite a push handler. `true` when one was replaced.
    pub async fn replace_handler(&self, kind: &str, handler: impl FnMut(&Value) + Send + 'static) -> bool {
        self.request(|reply| Command::Replace { kind: kind.to_owned(), handler: Box::new(handler), reply })
            .await
            .unwrap_or(false)
    }

    pub async fn remove_handler(&self, kind: &str) -> bool {
        self.request(|reply| Command::Remove { kind: kind.to_owned(), reply })
            .await
            .unwrap_or(false)
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Shutdown`] once the loop has stopped.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Snapshot).await
    }

    /// Last state published by the session task.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Shutdown`] if the loop stops first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), SessionError> {
        let mut rx = self.state.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::Shutdown)
    }

    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Stop the session task. Outstanding requests are dropped without
    /// running their callbacks.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

type ReplySlot = Arc<Mutex<Option<oneshot::Sender<Result<Value, ErrorInfo>>>>>;

fn reply_slot() -> (ReplySlot, oneshot::Receiver<Result<Value, ErrorInfo>>) {
    let (tx, rx) = oneshot::channel();
    (Arc::new(Mutex::new(Some(tx))), rx)
}

fn success_to(slot: &ReplySlot) -> impl FnOnce(Value) + Send + 'static {
    let slot = Arc::clone(slot);
    move |value| deliver(&slot, Ok(value))
}

fn error_to(slot: &ReplySlot) -> impl FnOnce(ErrorInfo) + Send + 'static {
    let slot = Arc::clone(slot);
    move |info| deliver(&slot, Err(info))
}

fn deliver(slot: &ReplySlot, result: Result<Value, ErrorInfo>) {
    let sender = slot.lock().ok().and_then(|mut guard| guard.take());
    if let Some(tx) = sender {
        let _ = tx.send(result);
    }
}

fn dropped() -> ErrorInfo {
    ErrorInfo::new(CODE_NO_RESPONSE, "request dropped before a response arrived")
}

// =============================================================================
// BACKOFF
// =============================================================================

struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, current: policy.initial_delay, attempt: 0 }
    }

    fn reset(&mut self) {
        self.current = self.policy.initial_delay;
        self.attempt = 0;
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = self.current.saturating_mul(2).min(self.policy.max_delay);
        self.attempt += 1;
        with_jitter(base)
    }
}

fn with_jitter(base: Duration) -> Duration {
    let millis = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let extra = rand::rng().random_range(0..=millis / 4);
    Duration::from_millis(millis.saturating_add(extra))
}

// =============================================================================
// EVENT LOOP
// =============================================================================

struct Driver {
    session: Session,
    links: LinkEvents,
    commands: mpsc::UnboundedReceiver<Command>,
    backoff: Option<Backoff>,
    reconnect_at: Option<Instant>,
    auto_reconnect: bool,
    state_tx: watch::Sender<ConnectionState>,
    notices: broadcast::Sender<SessionNotice>,
}

impl Driver {
    async fn run(mut self) {
        info!(url = %self.session.url(), "session: task started");
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.apply(cmd),
                },
                Some(event) = self.links.recv() => self.on_link(event),
                () = sleep_until(self.reconnect_at) => self.reconnect(),
            }
            self.publish_state();
        }

        if self.session.state() != ConnectionState::Disconnected {
            self.session.transport.close();
        }
        info!(outstanding = self.session.outstanding(), "session: task stopped");
    }

    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => {
                let result = self.session.connect();
                if result.is_ok() {
                    self.auto_reconnect = true;
                    self.reconnect_at = None;
                    if let Some(backoff) = &mut self.backoff {
                        backoff.reset();
                    }
                }
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                let result = self.session.disconnect();
                if result.is_ok() {
                    self.auto_reconnect = false;
                }
                let _ = reply.send(result);
            }
            Command::Enqueue { route, payload, on_success, on_error, options, reply } => {
                let _ = reply.send(self.session.enqueue(&route, payload, on_success, on_error, &options));
            }
            Command::Send { route, payload, options, reply } => {
                let _ = reply.send(self.session.send(&route, payload, &options));
            }
            Command::Cancel { key, reply } => {
                let _ = reply.send(self.session.cancel(&key));
            }
            Command::Register { kind, handler, reply } => {
                let _ = reply.send(self.session.on(&kind, handler));
            }
            Command::Replace { kind, handler, reply } => {
                let _ = reply.send(self.session.replace_handler(&kind, handler));
            }
            Command::Remove { kind, reply } => {
                let _ = reply.send(self.session.remove_handler(&kind));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(SessionSnapshot {
                    state: self.session.state(),
                    info: self.session.info().cloned(),
                    channel: self.session.channel().map(str::to_owned),
                    outstanding: self.session.outstanding(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn on_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => {
                self.session.on_open();
                if let Some(backoff) = &mut self.backoff {
                    backoff.reset();
                }
            }
            LinkEvent::Text(text) => {
                let outcome = self.session.dispatch_text(&text);
                self.after_dispatch(outcome);
            }
            LinkEvent::Binary(bytes) => {
                let outcome = self.session.dispatch_bytes(&bytes);
                self.after_dispatch(outcome);
            }
            LinkEvent::Closed { code, reason } => {
                self.session.on_close(code, &reason);
                self.schedule_reconnect();
            }
            LinkEvent::Failed { code, message } => {
                self.session.on_error(code, &message);
                self.schedule_reconnect();
            }
        }
    }

    fn after_dispatch(&mut self, outcome: DispatchOutcome) {
        let DispatchOutcome::Push(outcome) = outcome else {
            return;
        };
        let notice = match outcome {
            RouteOutcome::Linked { channel } => SessionNotice::Linked { channel },
            RouteOutcome::PeerDisconnected { channel, code, message } => {
                SessionNotice::PeerDisconnected { channel, code, message }
            }
            RouteOutcome::Failed { kind, error } => SessionNotice::PushFailed { kind, error },
            RouteOutcome::SelfDisconnect { .. } => {
                self.auto_reconnect = false;
                return;
            }
            RouteOutcome::Handled { .. } | RouteOutcome::InvalidPayload { .. } | RouteOutcome::Unhandled { .. } => {
                return;
            }
        };
        let _ = self.notices.send(notice);
    }

    fn schedule_reconnect(&mut self) {
        if !self.auto_reconnect
            || self.reconnect_at.is_some()
            || self.session.state() != ConnectionState::Disconnected
        {
            return;
        }
        let Some(backoff) = &mut self.backoff else {
            return;
        };
        let delay = backoff.next_delay();
        let attempt = backoff.attempt;
        info!(attempt, ?delay, "session: reconnect scheduled");
        self.reconnect_at = Some(Instant::now() + delay);
        let _ = self.notices.send(SessionNotice::ReconnectScheduled { attempt, delay });
    }

    fn reconnect(&mut self) {
        self.reconnect_at = None;
        if let Err(e) = self.session.connect() {
            debug!(error = %e, "session: reconnect skipped");
        }
    }

    fn publish_state(&mut self) {
        let state = self.session.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            let info = self.session.info().cloned();
            let _ = self.notices.send(SessionNotice::StateChanged { state, info });
        }
    }
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;
