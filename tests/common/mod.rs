#![allow(dead_code)]

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use verto_rtc::test_utils::{EventRecorder, MockNetwork};
use verto_rtc::types::Event;
use verto_rtc::{Client, ClientConfig, Credentials, Environment, Message, Method, Payload};

pub const MOCK_URL: &str = "ws://signaling.mock.test:14938";

/// Config pointed at the mock network. The keepalive interval is pushed far
/// out so pings only show up in tests that ask for them.
pub fn config() -> ClientConfig {
    let mut config = ClientConfig::with_environment(Environment::Custom(MOCK_URL.to_string()));
    config.keepalive.interval = Duration::from_secs(3600);
    config
}

pub fn token_config() -> ClientConfig {
    let mut config = config();
    config.credentials = Some(Credentials::Token("test-login-token".to_string()));
    config
}

pub struct Harness {
    pub client: Client,
    pub network: MockNetwork,
    pub events: Arc<EventRecorder>,
}

pub fn harness(config: ClientConfig) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let network = MockNetwork::new();
    let events = EventRecorder::new();
    let client = Client::new(config, network.factory(), events.clone()).unwrap();
    Harness {
        client,
        network,
        events,
    }
}

impl Harness {
    pub async fn expect(&self, pred: impl Fn(&Event) -> bool) -> Event {
        tokio::time::timeout(Duration::from_secs(120), self.events.wait_for(pred))
            .await
            .expect("timed out waiting for event")
    }

    pub async fn sent(&self) -> Message {
        tokio::time::timeout(Duration::from_secs(120), self.network.next_message())
            .await
            .expect("timed out waiting for client frame")
            .expect("client frame did not decode")
    }

    /// Next frame the client sent, which must be a request for `method`.
    pub async fn sent_request(&self, method: Method) -> Message {
        let message = self.sent().await;
        assert_eq!(message.method(), Some(&method), "unexpected frame {message:?}");
        message
    }

    pub async fn connect(&self) {
        self.client.connect().unwrap();
        self.expect(|e| matches!(e, Event::Connected)).await;
    }

    /// Connects and answers the login with `sessid`.
    pub async fn connect_and_login(&self, sessid: &str) {
        self.connect().await;
        let login = self.sent_request(Method::Login).await;
        self.reply(&login, json!({ "message": "logged in", "sessid": sessid }));
        self.expect(|e| matches!(e, Event::SessionEstablished { .. }))
            .await;
    }

    pub fn reply(&self, request: &Message, result: Value) {
        let id = request.id.clone().expect("request without id");
        self.network.push_message(&Message::result(id, result));
    }

    pub fn server_request(&self, id: &str, method: Method, params: Value) {
        let Value::Object(params) = params else {
            panic!("params must be an object");
        };
        self.network
            .push_message(&Message::request(id, method, params));
    }
}

pub fn result_of(message: &Message) -> &Value {
    match &message.payload {
        Payload::Result(result) => result,
        other => panic!("expected a result, got {other:?}"),
    }
}
