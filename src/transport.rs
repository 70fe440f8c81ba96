//! Transport seam and the websocket link behind it.
//!
//! DESIGN
//! ======
//! The session talks to a [`Transport`]: three synchronous, non-blocking
//! calls. Results come back later as [`LinkEvent`]s on a channel the runtime
//! loop drains.
//!
//! [`WsTransport`] spawns one tokio task per `open`. Each task gets a fresh
//! generation number; [`LinkEvents::recv`] drops events from superseded
//! links, so a late close from an old socket never touches the new session
//! state. Every link emits exactly one terminal event (`Closed` or
//! `Failed`).
//!
//! Both handshakes are bounded by [`LinkTimeouts`]. An opening handshake
//! that never completes reports `Failed` with the no-response code. A close
//! the peer never acknowledges reports `Closed` once the close deadline
//! passes, and the socket is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::config::LinkTimeouts;
use crate::error::{CODE_NO_RESPONSE, SessionError};

/// Sending side of the connection. Calls must not block.
pub trait Transport: Send {
    /// Begin opening a link to `url`. Completion arrives as an event.
    fn open(&mut self, url: &str);
    /// Begin closing the current link, if any.
    fn close(&mut self);
    /// Queue one text frame on the current link.
    ///
    /// # Errors
    ///
    /// Returns an error when there is no live link to write to.
    fn send(&mut self, text: String) -> Result<(), SessionError>;
}

/// Something that happened on a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Text(String),
    Binary(Vec<u8>),
    /// The peer or the client closed the link. `code` is the close code.
    Closed { code: Option<i32>, reason: String },
    /// The link failed to open or broke while open.
    Failed { code: Option<i32>, message: String },
}

impl LinkEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed { .. })
    }
}

// =============================================================================
// EVENT CHANNEL
// =============================================================================

/// Receiving side for link events. Filters stale generations.
pub struct LinkEvents {
    rx: mpsc::UnboundedReceiver<(u64, LinkEvent)>,
    current: Arc<AtomicU64>,
}

impl LinkEvents {
    /// Next event from the current link. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        loop {
            let (generation, event) = self.rx.recv().await?;
            if generation == self.current.load(Ordering::Acquire) {
                return Some(event);
            }
            debug!(generation, ?event, "link: dropping event from superseded link");
        }
    }
}

// =============================================================================
// WEBSOCKET TRANSPORT
// =============================================================================

enum Outgoing {
    Text(String),
    Close,
}

pub struct WsTransport {
    events: mpsc::UnboundedSender<(u64, LinkEvent)>,
    current: Arc<AtomicU64>,
    outbound: Option<mpsc::UnboundedSender<Outgoing>>,
    timeouts: LinkTimeouts,
}

impl WsTransport {
    /// Build a transport and the event stream its links report into.
    #[must_use]
    pub fn new() -> (Self, LinkEvents) {
        Self::with_timeouts(LinkTimeouts::default())
    }

    #[must_use]
    pub fn with_timeouts(timeouts: LinkTimeouts) -> (Self, LinkEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let current = Arc::new(AtomicU64::new(0));
        let transport = Self { events, current: Arc::clone(&current), outbound: None, timeouts };
        (transport, LinkEvents { rx, current })
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str) {
        let generation = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        // Dropping the old sender ends the superseded link.
        self.outbound = Some(tx);
        info!(%url, generation, "link: opening");
        tokio::spawn(run_link(url.to_owned(), generation, self.timeouts, rx, self.events.clone()));
    }

    fn close(&mut self) {
        if let Some(tx) = self.outbound.take() {
            let _ = tx.send(Outgoing::Close);
        }
    }

    fn send(&mut self, text: String) -> Result<(), SessionError> {
        let tx = self.outbound.as_ref().ok_or(SessionError::NotConnected)?;
        tx.send(Outgoing::Text(text))
            .map_err(|_| SessionError::Transport("link task has stopped".into()))
    }
}

async fn run_link(
    url: String,
    generation: u64,
    timeouts: LinkTimeouts,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<(u64, LinkEvent)>,
) {
    let emit = |event: LinkEvent| {
        let _ = events.send((generation, event));
    };

    let stream = match tokio::time::timeout(timeouts.handshake, connect_async(url.as_str())).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            warn!(%url, generation, error = %e, "link: connect failed");
            emit(LinkEvent::Failed { code: Some(handshake_code(&e)), message: e.to_string() });
            return;
        }
        Err(_) => {
            warn!(%url, generation, timeout = ?timeouts.handshake, "link: handshake timed out");
            emit(LinkEvent::Failed {
                code: Some(CODE_NO_RESPONSE),
                message: format!("no handshake response within {:?}", timeouts.handshake),
            });
            return;
        }
    };
    emit(LinkEvent::Opened);

    let (mut write, mut read) = stream.split();
    // Set once our close frame is queued; the peer has until then to answer.
    let mut close_deadline: Option<Instant> = None;

    let terminal = loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => emit(LinkEvent::Text(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => emit(LinkEvent::Binary(bytes.to_vec())),
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => LinkEvent::Closed {
                            code: Some(i32::from(u16::from(frame.code))),
                            reason: frame.reason.to_string(),
                        },
                        None => LinkEvent::Closed { code: None, reason: String::new() },
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break LinkEvent::Failed { code: Some(CODE_NO_RESPONSE), message: e.to_string() },
                None => break LinkEvent::Closed { code: None, reason: String::new() },
            },
            out = outbound.recv(), if close_deadline.is_none() => match out {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        break LinkEvent::Failed { code: Some(CODE_NO_RESPONSE), message: e.to_string() };
                    }
                }
                Some(Outgoing::Close) | None => {
                    debug!(generation, "link: closing");
                    let deadline = Instant::now() + timeouts.close;
                    close_deadline = Some(deadline);
                    match tokio::time::timeout_at(deadline, write.send(Message::Close(None))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => break LinkEvent::Closed { code: None, reason: String::new() },
                        Err(_) => break close_timed_out(timeouts.close),
                    }
                }
            },
            () = sleep_until(close_deadline) => {
                warn!(generation, timeout = ?timeouts.close, "link: peer never acknowledged close");
                break close_timed_out(timeouts.close);
            }
        }
    };

    info!(generation, ?terminal, "link: ended");
    emit(terminal);
}

fn close_timed_out(timeout: Duration) -> LinkEvent {
    LinkEvent::Closed { code: None, reason: format!("close handshake timed out after {timeout:?}") }
}

/// Resolves at `deadline`, or never when there is none.
pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// HTTP status of a rejected upgrade, else the no-response code.
fn handshake_code(err: &tungstenite::Error) -> i32 {
    match err {
        tungstenite::Error::Http(response) => i32::from(response.status().as_u16()),
        _ => CODE_NO_RESPONSE,
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
