mod common;

use common::{config, harness, result_of, token_config};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use verto_rtc::types::{DisconnectReason, Event, GatewayState};
use verto_rtc::{Message, Params, Payload, ProtocolError, RequestError};
use vertocore::Method;

// Error code the server uses for "Authentication Required".
const AUTH_REQUIRED: i64 = -32000;

#[tokio::test]
async fn test_echo_before_login_gets_protocol_error() {
    let h = harness(config());
    h.connect().await;

    let response = h.client.send_request(Method::Echo, Params::new()).unwrap();
    let echo = h.sent_request(Method::Echo).await;
    assert_eq!(echo.id.as_ref(), Some(response.id()));

    h.network.push_message(&Message::error(
        echo.id.clone(),
        ProtocolError::new(AUTH_REQUIRED, "Authentication Required"),
    ));

    match response.await {
        Err(RequestError::Protocol(e)) => {
            assert_eq!(e.code, AUTH_REQUIRED);
            assert_eq!(e.message, "Authentication Required");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
    // A routed error is not also reported as unsolicited.
    assert!(
        !h.events
            .events()
            .iter()
            .any(|e| matches!(e, Event::ServerError(_)))
    );
}

#[tokio::test]
async fn test_request_ids_are_distinct() {
    let h = harness(config());
    h.connect().await;

    let mut ids = HashSet::new();
    for _ in 0..50 {
        let response = h.client.send_request(Method::Echo, Params::new()).unwrap();
        assert!(ids.insert(response.id().clone()));
    }
}

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let h = harness(config());
    h.connect().await;

    let first = h
        .client
        .send_request(Method::Echo, json!({"n": 1}).as_object().unwrap().clone())
        .unwrap();
    let second = h
        .client
        .send_request(Method::Echo, json!({"n": 2}).as_object().unwrap().clone())
        .unwrap();
    let first_sent = h.sent_request(Method::Echo).await;
    let second_sent = h.sent_request(Method::Echo).await;
    assert_ne!(first_sent.id, second_sent.id);

    h.reply(&second_sent, json!({"n": 2}));
    h.reply(&first_sent, json!({"n": 1}));

    assert_eq!(second.await, Ok(json!({"n": 2})));
    assert_eq!(first.await, Ok(json!({"n": 1})));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out() {
    let mut config = config();
    config.request_timeout = Duration::from_secs(5);
    let h = harness(config);
    h.connect().await;

    let response = h.client.send_request(Method::Echo, Params::new()).unwrap();
    let sent = h.sent_request(Method::Echo).await;
    assert_eq!(response.await, Err(RequestError::Timeout));

    // A late answer is dropped without disturbing anything.
    h.reply(&sent, json!({}));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn test_unsolicited_error_is_reported() {
    let h = harness(config());
    h.connect().await;

    h.network.push_message(&Message::error(
        Some("nobody-asked".into()),
        ProtocolError::new(-32002, "Call does not exist"),
    ));
    match h.expect(|e| matches!(e, Event::ServerError(_))).await {
        Event::ServerError(e) => assert_eq!(e.code, -32002),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let h = harness(config());
    h.connect().await;

    h.network.push("{not json");
    h.network.push(r#"{"jsonrpc":"2.0","id":"x"}"#);
    let response = h.client.send_request(Method::Echo, Params::new()).unwrap();
    let sent = h.sent_request(Method::Echo).await;
    h.reply(&sent, json!("still here"));

    assert_eq!(response.await, Ok(json!("still here")));
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn test_login_establishes_session() {
    let h = harness(token_config());
    h.connect().await;

    let login = h.sent_request(Method::Login).await;
    let params = login.params().unwrap();
    assert_eq!(params["login_token"], json!("test-login-token"));
    assert!(params["sessid"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(h.client.session_id().is_none());

    h.reply(&login, json!({"message": "logged in", "sessid": "server-sessid"}));
    match h
        .expect(|e| matches!(e, Event::SessionEstablished { .. }))
        .await
    {
        Event::SessionEstablished { session_id } => assert_eq!(session_id, "server-sessid"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.client.session_id().as_deref(), Some("server-sessid"));
}

#[tokio::test]
async fn test_login_rejection_is_reported() {
    let h = harness(token_config());
    h.connect().await;

    let login = h.sent_request(Method::Login).await;
    h.network.push_message(&Message::error(
        login.id.clone(),
        ProtocolError::new(-32001, "Authentication Failure"),
    ));
    match h.expect(|e| matches!(e, Event::ServerError(_))).await {
        Event::ServerError(e) => assert_eq!(e.code, -32001),
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.client.session_id().is_none());
}

#[tokio::test]
async fn test_session_cleared_on_link_loss() {
    let mut config = token_config();
    config.reconnect.auto_reconnect = false;
    let h = harness(config);
    h.connect_and_login("s-1").await;
    assert!(h.client.session_id().is_some());

    h.network.drop_connection("gone");
    h.expect(|e| matches!(e, Event::Disconnected(_))).await;
    assert!(h.client.session_id().is_none());
}

#[tokio::test]
async fn test_server_ping_is_acknowledged() {
    let h = harness(config());
    h.connect().await;

    h.server_request("srv-ping-1", Method::Ping, json!({"serno": 7}));
    let reply = h.sent().await;
    assert_eq!(reply.id, Some("srv-ping-1".into()));
    assert_eq!(result_of(&reply)["method"], json!("telnyx_rtc.ping"));

    // Server pings stay between client and server.
    let events = h.events.events();
    assert!(
        matches!(events.as_slice(), [Event::Connected]),
        "unexpected events {events:?}"
    );
}

#[tokio::test]
async fn test_unknown_method_gets_method_not_found() {
    let h = harness(config());
    h.connect().await;

    h.server_request(
        "srv-7",
        Method::Unknown("telnyx_rtc.teleport".to_string()),
        json!({}),
    );
    let reply = h.sent().await;
    assert_eq!(reply.id, Some("srv-7".into()));
    match reply.payload {
        Payload::Error(e) => assert_eq!(e.code, ProtocolError::METHOD_NOT_FOUND),
        other => panic!("expected an error reply, got {other:?}"),
    }
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn test_informational_verbs_are_acknowledged() {
    let h = harness(config());
    h.connect().await;

    for (id, method) in [
        ("srv-9", Method::Punt),
        ("srv-10", Method::Display),
        ("srv-11", Method::AttachCalls),
        ("srv-12", Method::AiConversation),
    ] {
        h.server_request(id, method.clone(), json!({}));
        let reply = h.sent().await;
        assert_eq!(reply.id, Some(id.into()));
        assert_eq!(result_of(&reply)["method"], json!(method.as_str()));
    }
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn test_client_ready_and_gateway_state() {
    let h = harness(config());
    h.connect().await;

    h.server_request("srv-1", Method::ClientReady, json!({}));
    h.expect(|e| matches!(e, Event::ClientReady)).await;
    assert_eq!(h.sent().await.id, Some("srv-1".into()));

    h.server_request(
        "srv-2",
        Method::GatewayState,
        json!({"state": "REGED"}),
    );
    match h
        .expect(|e| matches!(e, Event::GatewayStateChanged(_)))
        .await
    {
        Event::GatewayStateChanged(state) => assert_eq!(state, GatewayState::Reged),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_notification_has_no_id() {
    let h = harness(config());
    h.connect().await;

    h.client
        .notify(Method::Info, json!({"dtmf": "1"}).as_object().unwrap().clone())
        .unwrap();
    let sent = h.sent_request(Method::Info).await;
    assert!(sent.id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pong_keeps_link_up() {
    let mut config = config();
    config.keepalive.interval = Duration::from_secs(15);
    config.keepalive.timeout = Duration::from_secs(10);
    let h = harness(config);
    h.connect().await;

    for _ in 0..3 {
        let ping = h.sent_request(Method::Ping).await;
        h.reply(&ping, json!({"method": "telnyx_rtc.ping"}));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(h.client.is_connected());
    assert!(
        !h.events
            .events()
            .iter()
            .any(|e| matches!(e, Event::Disconnected(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_timeout_forces_reconnect() {
    let mut config = config();
    config.keepalive.interval = Duration::from_secs(15);
    config.keepalive.timeout = Duration::from_secs(10);
    let h = harness(config);
    h.connect().await;

    let ping = h.sent_request(Method::Ping).await;
    assert!(ping.id.is_some());

    match h.expect(|e| matches!(e, Event::Disconnected(_))).await {
        Event::Disconnected(reason) => assert_eq!(reason, DisconnectReason::KeepAliveTimeout),
        other => panic!("unexpected {other:?}"),
    }
    h.expect(|e| matches!(e, Event::Reconnecting { attempt: 1, .. }))
        .await;
    h.expect(|e| matches!(e, Event::Connected)).await;
    assert_eq!(h.network.connect_attempts(), 2);
}
