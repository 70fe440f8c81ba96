//! Connection lifecycle.
//!
//! ```text
//!   Disconnected --connect()--> Connecting --opened--> Connected
//!        ^                                                 |
//!        |                                            disconnect()
//!        +---------- closed / error (from any) ---- Disconnecting
//! ```
//!
//! The machine only records state; opening and closing the transport is the
//! session's job once a transition has been accepted.

use tracing::{debug, info, warn};

use crate::classify;
use crate::error::{ErrorInfo, SessionError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    /// Set on entry to `Disconnected` when a code was supplied.
    info: Option<ErrorInfo>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self { state: ConnectionState::Disconnected, info: None }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn info(&self) -> Option<&ErrorInfo> {
        self.info.as_ref()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Disconnected → Connecting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] from any other state.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        self.transition(ConnectionState::Disconnected, ConnectionState::Connecting, "connect")
    }

    /// Connected → Disconnecting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] from any other state.
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        self.transition(ConnectionState::Connected, ConnectionState::Disconnecting, "disconnect")
    }

    /// Transport-open event. Returns `true` when the machine moved to
    /// `Connected`; an open outside `Connecting` is ignored.
    pub fn on_open(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            warn!(state = ?self.state, "conn: open event outside connecting; ignored");
            return false;
        }
        self.info = None;
        self.state = ConnectionState::Connected;
        info!("conn: connected");
        true
    }

    /// Transport-close event. Builds disconnect-table text when `code` is set.
    pub fn on_close(&mut self, code: Option<i32>, reason: &str) {
        let info = code.map(|code| classify::disconnect_error(code, reason));
        self.enter_disconnected(info);
    }

    /// Transport-error event. Builds connection-table text when `code` is set.
    pub fn on_error(&mut self, code: Option<i32>, message: &str) {
        let info = code.map(|code| classify::connection_error(code, message));
        self.enter_disconnected(info);
    }

    fn enter_disconnected(&mut self, info: Option<ErrorInfo>) {
        info!(from = ?self.state, code = info.as_ref().map(ErrorInfo::code), "conn: disconnected");
        self.state = ConnectionState::Disconnected;
        self.info = info;
    }

    fn transition(
        &mut self,
        from: ConnectionState,
        to: ConnectionState,
        action: &'static str,
    ) -> Result<(), SessionError> {
        if self.state != from {
            return Err(SessionError::InvalidTransition { from: self.state, action });
        }
        debug!(?from, ?to, "conn: transition");
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
