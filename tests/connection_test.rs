mod common;

use common::{config, harness};
use std::time::Duration;
use tokio::time::Instant;
use verto_rtc::types::{DisconnectReason, Event};
use verto_rtc::{ConnectionState, Params, RequestError, SendError};
use vertocore::Method;

#[tokio::test]
async fn test_connect_reports_connected() {
    let h = harness(config());
    assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);

    h.connect().await;

    assert!(h.client.is_connected());
    assert_eq!(h.network.connect_attempts(), 1);
    // No credentials configured, so nothing is sent on connect.
    assert!(h.network.drain_sent().await.is_empty());
}

#[tokio::test]
async fn test_send_while_disconnected_fails_immediately() {
    let h = harness(config());

    match h.client.send_request(Method::Echo, Params::new()) {
        Err(RequestError::Send(SendError::NotConnected)) => {}
        other => panic!("expected NotConnected, got {:?}", other.map(|f| f.id().clone())),
    }
    assert_eq!(
        h.client.notify(Method::Info, Params::new()),
        Err(SendError::NotConnected)
    );
    assert_eq!(h.network.connect_attempts(), 0);
}

#[tokio::test]
async fn test_unexpected_disconnect_fails_pending_requests() {
    let mut config = config();
    config.reconnect.auto_reconnect = false;
    let h = harness(config);
    h.connect().await;

    let first = h.client.send_request(Method::Echo, Params::new()).unwrap();
    let second = h.client.send_request(Method::Echo, Params::new()).unwrap();
    h.sent_request(Method::Echo).await;
    h.sent_request(Method::Echo).await;

    h.network.drop_connection("peer reset");

    assert_eq!(first.await, Err(RequestError::ConnectionLost));
    assert_eq!(second.await, Err(RequestError::ConnectionLost));
    match h.expect(|e| matches!(e, Event::Disconnected(_))).await {
        Event::Disconnected(DisconnectReason::TransportError(reason)) => {
            assert_eq!(reason, "peer reset")
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_link_loss() {
    let h = harness(config());
    h.connect().await;

    h.network.drop_connection("gone");
    h.expect(|e| matches!(e, Event::Disconnected(_))).await;
    match h.expect(|e| matches!(e, Event::Reconnecting { .. })).await {
        Event::Reconnecting { attempt, delay } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay, Duration::from_secs(1));
        }
        other => panic!("unexpected {other:?}"),
    }
    h.expect(|e| matches!(e, Event::Connected)).await;
    assert_eq!(h.network.connect_attempts(), 2);
    assert!(h.client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_gives_up_after_max_attempts() {
    let mut config = config();
    config.reconnect.max_attempts = 3;
    let h = harness(config);
    h.network.refuse_connections(true);

    let started = Instant::now();
    h.client.connect().unwrap();
    match h.expect(|e| matches!(e, Event::ConnectionLost { .. })).await {
        Event::ConnectionLost { attempts } => assert_eq!(attempts, 3),
        other => panic!("unexpected {other:?}"),
    }

    // One initial attempt plus three retries spaced 1s, 2s and 4s apart.
    assert_eq!(h.network.connect_attempts(), 4);
    assert!(started.elapsed() >= Duration::from_secs(7));

    let delays: Vec<(u32, Duration)> = h
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Reconnecting { attempt, delay } => Some((attempt, delay)),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            (1, Duration::from_secs(1)),
            (2, Duration::from_secs(2)),
            (3, Duration::from_secs(4)),
        ]
    );
    let failures = h
        .events
        .events()
        .iter()
        .filter(|e| matches!(e, Event::TransportError(_)))
        .count();
    assert_eq!(failures, 4);

    // Nothing else is attempted once the policy is exhausted.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.network.connect_attempts(), 4);
    assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_counter_resets_after_success() {
    let h = harness(config());
    h.network.fail_next_connects(2);

    h.client.connect().unwrap();
    h.expect(|e| matches!(e, Event::Connected)).await;
    assert_eq!(h.network.connect_attempts(), 3);

    h.network.drop_connection("gone");
    match h.expect(|e| matches!(e, Event::Reconnecting { .. })).await {
        Event::Reconnecting { attempt, .. } => assert_eq!(attempt, 1),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_explicit_disconnect_never_reconnects() {
    let h = harness(config());
    h.connect().await;

    h.client.disconnect().await;
    assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
    assert!(!h.network.is_linked());

    tokio::time::sleep(Duration::from_secs(300)).await;

    let events = h.events.events();
    assert!(matches!(
        events.last(),
        Some(Event::Disconnected(DisconnectReason::UserInitiated))
    ));
    assert!(!events.iter().any(|e| matches!(e, Event::Reconnecting { .. })));
    assert_eq!(h.network.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_connect_attempt() {
    let h = harness(config());
    h.network.set_connect_delay(Some(Duration::from_secs(5)));

    h.client.connect().unwrap();
    h.client.disconnect().await;

    tokio::time::sleep(Duration::from_secs(60)).await;

    let events = h.events.events();
    assert!(!events.iter().any(|e| matches!(e, Event::Connected)));
    assert!(matches!(
        events.as_slice(),
        [Event::Disconnected(DisconnectReason::UserInitiated)]
    ));
    assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let h = harness(config());
    h.connect().await;

    h.network.drop_connection("gone");
    h.expect(|e| matches!(e, Event::Reconnecting { .. })).await;
    h.client.disconnect().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.network.connect_attempts(), 1);
    assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_again_after_disconnect() {
    let h = harness(config());
    h.connect().await;
    h.client.disconnect().await;

    h.connect().await;
    assert!(h.client.is_connected());
    assert_eq!(h.network.connect_attempts(), 2);
}
