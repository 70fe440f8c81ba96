use std::collections::HashMap;

use super::*;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    move |key| map.get(key).cloned()
}

#[test]
fn new_uses_default_reconnect_and_unbounded_replays() {
    let cfg = SessionConfig::new("ws://localhost:8001/game/");
    assert_eq!(cfg.reconnect, Some(ReconnectPolicy::default()));
    assert_eq!(cfg.max_replays, None);
    assert_eq!(cfg.timeouts, LinkTimeouts::default());
    assert!(cfg.validate().is_ok());
}

#[test]
fn handshake_deadlines_are_bounded_by_default() {
    let timeouts = SessionConfig::new("ws://localhost/").timeouts;
    assert_eq!(timeouts.handshake, Duration::from_secs(10));
    assert_eq!(timeouts.close, Duration::from_secs(2));

    let cfg = SessionConfig::new("ws://localhost/")
        .handshake_timeout(Duration::from_millis(150))
        .close_timeout(Duration::from_millis(75));
    assert_eq!(
        cfg.timeouts,
        LinkTimeouts { handshake: Duration::from_millis(150), close: Duration::from_millis(75) }
    );
}

#[test]
fn from_lookup_reads_handshake_timeouts() {
    let cfg = SessionConfig::from_lookup(lookup(&[
        ("SWITCHBOARD_URL", "ws://127.0.0.1:8001/game/"),
        ("SWITCHBOARD_HANDSHAKE_TIMEOUT_MS", "3000"),
        ("SWITCHBOARD_CLOSE_TIMEOUT_MS", "500"),
    ]))
    .unwrap();
    assert_eq!(cfg.timeouts.handshake, Duration::from_secs(3));
    assert_eq!(cfg.timeouts.close, Duration::from_millis(500));

    let err = SessionConfig::from_lookup(lookup(&[
        ("SWITCHBOARD_URL", "ws://127.0.0.1:8001/game/"),
        ("SWITCHBOARD_CLOSE_TIMEOUT_MS", "soon"),
    ]))
    .expect_err("not a number");
    assert_eq!(err, ConfigError::InvalidValue { key: "SWITCHBOARD_CLOSE_TIMEOUT_MS", value: "soon".into() });
}

#[test]
fn builder_chain_overrides_defaults() {
    let cfg = SessionConfig::new("wss://game.example/ws")
        .reconnect_delay(Duration::from_millis(50), Duration::from_secs(2))
        .max_replays(3);
    assert_eq!(
        cfg.reconnect,
        Some(ReconnectPolicy { initial_delay: Duration::from_millis(50), max_delay: Duration::from_secs(2) })
    );
    assert_eq!(cfg.max_replays, Some(3));

    assert_eq!(cfg.no_reconnect().reconnect, None);
}

#[test]
fn validate_rejects_http_url() {
    let err = SessionConfig::new("http://localhost").validate().expect_err("http is not a ws url");
    assert_eq!(err, ConfigError::InvalidUrl("http://localhost".into()));
}

#[test]
fn from_lookup_requires_url() {
    assert_eq!(SessionConfig::from_lookup(lookup(&[])), Err(ConfigError::MissingUrl));
    assert_eq!(SessionConfig::from_lookup(lookup(&[("SWITCHBOARD_URL", "")])), Err(ConfigError::MissingUrl));
}

#[test]
fn from_lookup_defaults() {
    let cfg = SessionConfig::from_lookup(lookup(&[("SWITCHBOARD_URL", "ws://127.0.0.1:8001/game/")])).unwrap();
    assert_eq!(cfg.url, "ws://127.0.0.1:8001/game/");
    assert_eq!(cfg.reconnect, Some(ReconnectPolicy::default()));
    assert_eq!(cfg.max_replays, None);
}

#[test]
fn from_lookup_parses_overrides() {
    let cfg = SessionConfig::from_lookup(lookup(&[
        ("SWITCHBOARD_URL", "wss://game.example/ws"),
        ("SWITCHBOARD_RECONNECT_INITIAL_MS", "250"),
        ("SWITCHBOARD_RECONNECT_MAX_MS", "4000"),
        ("SWITCHBOARD_MAX_REPLAYS", "5"),
    ]))
    .unwrap();
    assert_eq!(
        cfg.reconnect,
        Some(ReconnectPolicy { initial_delay: Duration::from_millis(250), max_delay: Duration::from_millis(4000) })
    );
    assert_eq!(cfg.max_replays, Some(5));
}

#[test]
fn from_lookup_max_delay_never_below_initial() {
    let cfg = SessionConfig::from_lookup(lookup(&[
        ("SWITCHBOARD_URL", "ws://h"),
        ("SWITCHBOARD_RECONNECT_INITIAL_MS", "5000"),
        ("SWITCHBOARD_RECONNECT_MAX_MS", "10"),
    ]))
    .unwrap();
    let policy = cfg.reconnect.expect("reconnect enabled");
    assert_eq!(policy.max_delay, Duration::from_millis(5000));
}

#[test]
fn from_lookup_can_disable_reconnect() {
    let cfg = SessionConfig::from_lookup(lookup(&[("SWITCHBOARD_URL", "ws://h"), ("SWITCHBOARD_RECONNECT", "false")]))
        .unwrap();
    assert_eq!(cfg.reconnect, None);
}

#[test]
fn from_lookup_rejects_garbage_numbers() {
    let err = SessionConfig::from_lookup(lookup(&[("SWITCHBOARD_URL", "ws://h"), ("SWITCHBOARD_MAX_REPLAYS", "lots")]))
        .expect_err("invalid number");
    assert_eq!(err, ConfigError::InvalidValue { key: "SWITCHBOARD_MAX_REPLAYS", value: "lots".into() });
}

#[test]
fn from_lookup_rejects_non_ws_url() {
    let err = SessionConfig::from_lookup(lookup(&[("SWITCHBOARD_URL", "https://h")])).expect_err("bad scheme");
    assert!(matches!(err, ConfigError::InvalidUrl(_)));
}

#[test]
fn request_options_builders() {
    let opts = RequestOptions::new();
    assert!(opts.show_loading);
    assert!(!opts.requires_identity);
    assert!(!opts.fire_and_forget);

    let opts = RequestOptions::new().wait_text("logging in").fail_text("login failed: {message}").with_identity();
    assert_eq!(opts.wait_text, "logging in");
    assert_eq!(opts.fail_text_template.as_deref(), Some("login failed: {message}"));
    assert!(opts.requires_identity);

    assert!(!RequestOptions::new().no_loading().show_loading);
    assert!(RequestOptions::new().fire_and_forget().fire_and_forget);
}
