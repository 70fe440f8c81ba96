//! Session configuration and per-request options.
//!
//! `SessionConfig::from_env()` reads:
//! - `SWITCHBOARD_URL` (required): `ws://` or `wss://` endpoint
//! - `SWITCHBOARD_RECONNECT`: `true` (default) or `false`
//! - `SWITCHBOARD_RECONNECT_INITIAL_MS`: default 1000
//! - `SWITCHBOARD_RECONNECT_MAX_MS`: default 10000
//! - `SWITCHBOARD_MAX_REPLAYS`: unset means replay forever
//! - `SWITCHBOARD_HANDSHAKE_TIMEOUT_MS`: default 10000
//! - `SWITCHBOARD_CLOSE_TIMEOUT_MS`: default 2000

use std::time::Duration;

pub const DEFAULT_RECONNECT_INITIAL_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SWITCHBOARD_URL is required")]
    MissingUrl,
    #[error("server URL must start with ws:// or wss://, got `{0}`")]
    InvalidUrl(String),
    #[error("invalid value for {key}: `{value}`")]
    InvalidValue { key: &'static str, value: String },
}

/// Exponential backoff bounds for automatic reconnects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
        }
    }
}

/// Deadlines for the websocket opening and closing handshakes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkTimeouts {
    /// TCP connect plus HTTP upgrade. Expiry counts as "no response".
    pub handshake: Duration,
    /// Wait for the peer's close frame after ours before dropping the socket.
    pub close: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            close: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// The one server endpoint for this deployment.
    pub url: String,
    /// `None` disables automatic reconnects.
    pub reconnect: Option<ReconnectPolicy>,
    /// Reconnect replays allowed per request before it is failed.
    pub max_replays: Option<u32>,
    pub timeouts: LinkTimeouts,
}

impl SessionConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: Some(ReconnectPolicy::default()),
            max_replays: None,
            timeouts: LinkTimeouts::default(),
        }
    }

    #[must_use]
    pub fn no_reconnect(mut self) -> Self {
        self.reconnect = None;
        self
    }

    #[must_use]
    pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect = Some(ReconnectPolicy { initial_delay: initial, max_delay: max });
        self
    }

    #[must_use]
    pub fn max_replays(mut self, limit: u32) -> Self {
        self.max_replays = Some(limit);
        self
    }

    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.handshake = timeout;
        self
    }

    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.close = timeout;
        self
    }

    /// Check the endpoint scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] unless the URL is `ws://` or `wss://`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.starts_with("ws://") || self.url.starts_with("wss://") {
            Ok(())
        } else {
            Err(ConfigError::InvalidUrl(self.url.clone()))
        }
    }

    /// Build config from process environment variables.
    ///
    /// # Errors
    ///
    /// See [`SessionConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is missing or malformed, or when a
    /// numeric/boolean variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("SWITCHBOARD_URL").filter(|s| !s.is_empty()).ok_or(ConfigError::MissingUrl)?;

        let reconnect_enabled = parse_var(&lookup, "SWITCHBOARD_RECONNECT", parse_bool)?.unwrap_or(true);
        let initial_ms = parse_var(&lookup, "SWITCHBOARD_RECONNECT_INITIAL_MS", |s| s.parse::<u64>().ok())?
            .unwrap_or(DEFAULT_RECONNECT_INITIAL_MS);
        let max_ms = parse_var(&lookup, "SWITCHBOARD_RECONNECT_MAX_MS", |s| s.parse::<u64>().ok())?
            .unwrap_or(DEFAULT_RECONNECT_MAX_MS)
            .max(initial_ms);
        let max_replays = parse_var(&lookup, "SWITCHBOARD_MAX_REPLAYS", |s| s.parse::<u32>().ok())?;
        let handshake_ms = parse_var(&lookup, "SWITCHBOARD_HANDSHAKE_TIMEOUT_MS", |s| s.parse::<u64>().ok())?
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS);
        let close_ms = parse_var(&lookup, "SWITCHBOARD_CLOSE_TIMEOUT_MS", |s| s.parse::<u64>().ok())?
            .unwrap_or(DEFAULT_CLOSE_TIMEOUT_MS);

        let config = Self {
            url,
            reconnect: reconnect_enabled.then(|| ReconnectPolicy {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms),
            }),
            max_replays,
            timeouts: LinkTimeouts {
                handshake: Duration::from_millis(handshake_ms),
                close: Duration::from_millis(close_ms),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key).filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    parse(raw.trim()).map(Some).ok_or(ConfigError::InvalidValue { key, value: raw })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// =============================================================================
// REQUEST OPTIONS
// =============================================================================

/// Per-request presentation and routing options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestOptions {
    pub show_loading: bool,
    pub wait_text: String,
    /// Alert text on failure; `{code}` and `{message}` are substituted.
    pub fail_text_template: Option<String>,
    /// Attach the identity provider's id as `data.uid`.
    pub requires_identity: bool,
    /// Send without correlation; no callbacks will ever run.
    pub fire_and_forget: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            show_loading: true,
            wait_text: String::new(),
            fail_text_template: None,
            requires_identity: false,
            fire_and_forget: false,
        }
    }
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn wait_text(mut self, text: impl Into<String>) -> Self {
        self.show_loading = true;
        self.wait_text = text.into();
        self
    }

    #[must_use]
    pub fn no_loading(mut self) -> Self {
        self.show_loading = false;
        self
    }

    #[must_use]
    pub fn fail_text(mut self, template: impl Into<String>) -> Self {
        self.fail_text_template = Some(template.into());
        self
    }

    #[must_use]
    pub fn with_identity(mut self) -> Self {
        self.requires_identity = true;
        self
    }

    #[must_use]
    pub fn fire_and_forget(mut self) -> Self {
        self.fire_and_forget = true;
        self
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
