//! Client session layer for a JSON-over-websocket game server.
//!
//! DESIGN
//! ======
//! - One [`Session`] per connection. It correlates requests and responses by
//!   `(route, index)`, replays unanswered requests after a reconnect, routes
//!   server pushes to handlers and turns failures into [`ErrorInfo`] values
//!   for callbacks and alerts.
//! - [`Session`] itself is synchronous and I/O-free; everything it sends goes
//!   through the [`transport::Transport`] seam.
//! - [`runtime::spawn`] runs a session on a tokio task over a real websocket
//!   and hands back a cloneable [`SessionHandle`].
//! - [`service`] layers named operations with derived loading and failure
//!   text on top of a handle.
//!
//! Wire types live in the `frames` crate.

pub mod classify;
pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod service;
pub mod session;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use collaborators::{AlertSink, Collaborators, IdentityProvider, LoadingIndicator};
pub use config::{ConfigError, LinkTimeouts, ReconnectPolicy, RequestOptions, SessionConfig};
pub use dispatch::DispatchOutcome;
pub use error::{ErrorInfo, SessionError};
pub use registry::RequestKey;
pub use router::{PushEvent, RouteOutcome};
pub use runtime::{SessionHandle, SessionNotice, SessionSnapshot, spawn};
pub use service::{Operation, Operations, Service, ServiceError};
pub use session::Session;
pub use state::ConnectionState;
