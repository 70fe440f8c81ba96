use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use super::*;
use crate::config::{RequestOptions, SessionConfig};
use crate::error::{CODE_MALFORMED_FRAME, CODE_REQUEST_NOT_FOUND};
use crate::state::ConnectionState;
use crate::testing::{LoadingCall, RecordingAlerts, RecordingLoading, RecordingTransport, Slot, TransportCall, recording_collaborators};

fn connected() -> (Session, RecordingTransport, RecordingLoading, RecordingAlerts) {
    let transport = RecordingTransport::default();
    let (collab, loading, alerts) = recording_collaborators();
    let mut session = Session::new(&SessionConfig::new("ws://h/"), Box::new(transport.clone()), collab);
    session.connect().unwrap();
    session.on_open();
    (session, transport, loading, alerts)
}

fn response(route: &str, index: u64, status: i32, errmsg: Option<&str>, data: Value) -> String {
    json!({
        "method": "response",
        "route": route,
        "index": index,
        "status": status,
        "errmsg": errmsg,
        "data": data,
    })
    .to_string()
}

fn emit(kind: &str, data: Value) -> String {
    json!({"method": "emit", "type": kind, "status": 0, "data": data}).to_string()
}

// =============================================================================
// RESPONSES
// =============================================================================

#[test]
fn success_response_runs_success_callback() {
    let (mut session, _transport, loading, _alerts) = connected();
    let success = Slot::<Value>::default();
    let failure = Slot::<ErrorInfo>::default();
    let key = session
        .enqueue("player/login", json!({}), success.setter(), failure.setter(), &RequestOptions::new().wait_text("login"))
        .unwrap();

    let outcome = session.dispatch_text(&response("player/login", key.index(), 0, None, json!({"id": 7})));

    assert_eq!(outcome, DispatchOutcome::Resolved(key));
    assert_eq!(success.get(), Some(json!({"id": 7})));
    assert!(failure.get().is_none());
    assert_eq!(session.outstanding(), 0);
    assert_eq!(loading.calls(), vec![LoadingCall::Start("login".into()), LoadingCall::End]);
}

#[test]
fn failed_response_runs_error_callback_with_server_text() {
    let (mut session, _transport, _loading, alerts) = connected();
    let success = Slot::<Value>::default();
    let failure = Slot::<ErrorInfo>::default();
    let opts = RequestOptions::new().no_loading().fail_text("buy failed: {message}");
    let key = session.enqueue("shop/buy", json!({}), success.setter(), failure.setter(), &opts).unwrap();

    session.dispatch_text(&response("shop/buy", key.index(), 3, Some("not enough gold"), Value::Null));

    let info = failure.get().expect("error callback ran");
    assert_eq!(info.code(), 3);
    assert_eq!(info.message(), "not enough gold");
    assert!(success.get().is_none());
    assert_eq!(alerts.texts(), vec!["buy failed: not enough gold".to_owned()]);
}

#[test]
fn response_for_wrong_route_is_unmatched() {
    let (mut session, _transport, _loading, _alerts) = connected();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.set_unmatched_handler(move |info| sink.lock().unwrap().push(info));

    let success = Slot::<Value>::default();
    let key = session
        .enqueue("a", json!({}), success.setter(), |_| {}, &RequestOptions::new().no_loading())
        .unwrap();

    let outcome = session.dispatch_text(&response("b", key.index(), 0, None, json!({})));

    match outcome {
        DispatchOutcome::Unmatched(info) => assert_eq!(info.code(), CODE_REQUEST_NOT_FOUND),
        other => panic!("expected unmatched, got {other:?}"),
    }
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(success.get().is_none());
    assert_eq!(session.outstanding(), 1);
}

#[test]
fn duplicate_response_does_not_resolve_twice() {
    let (mut session, _transport, _loading, _alerts) = connected();
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    let key = session
        .enqueue("a", json!({}), move |_| *counter.lock().unwrap() += 1, |_| {}, &RequestOptions::new().no_loading())
        .unwrap();

    let frame = response("a", key.index(), 0, None, json!({}));
    assert!(matches!(session.dispatch_text(&frame), DispatchOutcome::Resolved(_)));
    assert!(matches!(session.dispatch_text(&frame), DispatchOutcome::Unmatched(_)));
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn malformed_frame_is_dropped() {
    let (mut session, _transport, _loading, _alerts) = connected();
    let success = Slot::<Value>::default();
    session
        .enqueue("a", json!({}), success.setter(), |_| {}, &RequestOptions::new().no_loading())
        .unwrap();

    for text in ["not json", r#"{"method":"bogus"}"#, r#"{"method":"response","route":"a"}"#] {
        match session.dispatch_text(text) {
            DispatchOutcome::Malformed(info) => assert_eq!(info.code(), CODE_MALFORMED_FRAME),
            other => panic!("expected malformed for {text}, got {other:?}"),
        }
    }
    assert!(success.get().is_none());
    assert_eq!(session.outstanding(), 1);
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[test]
fn binary_frames_decode_as_utf8_json() {
    let (mut session, _transport, _loading, _alerts) = connected();
    let key = session
        .enqueue("a", json!({}), |_| {}, |_| {}, &RequestOptions::new().no_loading())
        .unwrap();
    let frame = response("a", key.index(), 0, None, json!({}));
    assert_eq!(session.dispatch_bytes(frame.as_bytes()), DispatchOutcome::Resolved(key));

    assert!(matches!(session.dispatch_bytes(&[0xff, 0xfe]), DispatchOutcome::Malformed(_)));
}

// =============================================================================
// PUSHES
// =============================================================================

#[test]
fn push_reaches_registered_handler() {
    let (mut session, _transport, _loading, _alerts) = connected();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.on("chat", move |data| sink.lock().unwrap().push(data.clone())).unwrap();

    let outcome = session.dispatch_text(&emit("chat", json!({"text": "hi"})));

    assert_eq!(outcome, DispatchOutcome::Push(RouteOutcome::Handled { kind: "chat".into() }));
    assert_eq!(*seen.lock().unwrap(), vec![json!({"text": "hi"})]);
}

#[test]
fn unhandled_push_is_reported() {
    let (mut session, _transport, _loading, _alerts) = connected();
    let outcome = session.dispatch_text(&emit("weather", json!({})));
    assert_eq!(outcome, DispatchOutcome::Push(RouteOutcome::Unhandled { kind: "weather".into() }));
}

#[test]
fn failed_push_goes_to_error_sink() {
    let (mut session, _transport, _loading, _alerts) = connected();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.set_push_error_sink(Box::new(move |kind, info| sink.lock().unwrap().push((kind.to_owned(), info.code()))));

    let text = json!({"method": "emit", "type": "battle", "status": 2, "errmsg": "lost", "data": {}}).to_string();
    session.dispatch_text(&text);

    assert_eq!(*seen.lock().unwrap(), vec![("battle".to_owned(), 2)]);
}

#[test]
fn session_linked_records_channel_and_calls_nothing() {
    let (mut session, _transport, loading, alerts) = connected();
    let calls = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&calls);
    session.on("chat", move |_| sink.lock().unwrap().push("chat".into())).unwrap();
    let sink = Arc::clone(&calls);
    session.set_unmatched_handler(move |_| sink.lock().unwrap().push("unmatched".into()));
    let sink = Arc::clone(&calls);
    session.set_push_error_sink(Box::new(move |kind, _| sink.lock().unwrap().push(kind.to_owned())));

    let outcome = session.dispatch_text(&emit("session-linked", json!({"channel": "c-1"})));

    assert_eq!(outcome, DispatchOutcome::Push(RouteOutcome::Linked { channel: "c-1".into() }));
    assert_eq!(session.channel(), Some("c-1"));
    assert!(calls.lock().unwrap().is_empty());
    assert!(alerts.texts().is_empty());
    assert!(loading.calls().is_empty());
}

#[test]
fn peer_disconnect_for_own_channel_drops_session() {
    let (mut session, transport, _loading, alerts) = connected();
    session.dispatch_text(&emit("session-linked", json!({"channel": "c-1"})));
    assert_eq!(session.channel(), Some("c-1"));

    let outcome = session.dispatch_text(&emit(
        "peer-disconnected",
        json!({"channel": "c-1", "code": -1, "message": "logged in elsewhere"}),
    ));

    assert!(matches!(outcome, DispatchOutcome::Push(RouteOutcome::SelfDisconnect { code: -1, .. })));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.info().map(ErrorInfo::message), Some("logged in elsewhere"));
    assert_eq!(transport.calls().last(), Some(&TransportCall::Close));
    assert_eq!(alerts.texts(), vec!["logged in elsewhere".to_owned()]);

    // The socket's own close arriving afterwards changes nothing.
    session.on_close(Some(1000), "");
    assert_eq!(session.info().map(ErrorInfo::message), Some("logged in elsewhere"));
}

#[test]
fn peer_disconnect_for_other_channel_is_informational() {
    let (mut session, transport, _loading, alerts) = connected();
    session.dispatch_text(&emit("session-linked", json!({"channel": "c-1"})));

    let outcome = session.dispatch_text(&emit("peer-disconnected", json!({"channel": "c-2", "code": 1000})));

    assert!(matches!(outcome, DispatchOutcome::Push(RouteOutcome::PeerDisconnected { .. })));
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(!transport.calls().contains(&TransportCall::Close));
    assert!(alerts.texts().is_empty());
}
