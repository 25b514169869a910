use crate::transport::{TlsPolicy, Transport, TransportEvent, TransportFactory};
use crate::types::{Event, EventHandler};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use vertocore::Message;

struct Link {
    id: u64,
    events: mpsc::Sender<TransportEvent>,
}

#[derive(Default)]
struct NetworkState {
    next_link: u64,
    current: Option<Link>,
    connect_attempts: u32,
    fail_next: u32,
    refuse_all: bool,
    connect_delay: Option<Duration>,
}

/// An in-process stand-in for the signaling server.
///
/// Hand [`MockNetwork::factory`] to a client, then script the server side:
/// inspect what the client sent, push messages to it, or drop the link.
#[derive(Clone)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>,
    sent_tx: mpsc::UnboundedSender<String>,
    sent_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(NetworkState::default())),
            sent_tx,
            sent_rx: Arc::new(tokio::sync::Mutex::new(sent_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        Arc::new(MockTransportFactory {
            network: self.clone(),
        })
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Makes every connect attempt fail until switched off.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_all = refuse;
    }

    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.lock().connect_delay = delay;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn is_linked(&self) -> bool {
        self.lock().current.is_some()
    }

    /// Delivers `text` to the client as if the server sent it.
    pub fn push(&self, text: impl Into<String>) {
        if let Some(link) = &self.lock().current {
            let _ = link.events.try_send(TransportEvent::TextReceived(text.into()));
        }
    }

    pub fn push_message(&self, message: &Message) {
        self.push(message.encode());
    }

    /// Drops the link from the server side.
    pub fn drop_connection(&self, reason: &str) {
        if let Some(link) = self.lock().current.take() {
            let _ = link
                .events
                .try_send(TransportEvent::Disconnected(Some(reason.to_string())));
        }
    }

    /// Next text frame the client sent.
    pub async fn next_sent(&self) -> Option<String> {
        self.sent_rx.lock().await.recv().await
    }

    /// Next frame the client sent, decoded.
    pub async fn next_message(&self) -> Option<Message> {
        let text = self.next_sent().await?;
        Message::decode(&text).ok()
    }

    /// Frames sent so far that nobody has read yet.
    pub async fn drain_sent(&self) -> Vec<String> {
        let mut rx = self.sent_rx.lock().await;
        let mut sent = Vec::new();
        while let Ok(text) = rx.try_recv() {
            sent.push(text);
        }
        sent
    }
}

struct MockTransport {
    network: MockNetwork,
    link_id: u64,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        let linked = matches!(&self.network.lock().current, Some(link) if link.id == self.link_id);
        if !linked {
            return Err(anyhow::anyhow!("Socket is closed"));
        }
        self.network
            .sent_tx
            .send(text.to_string())
            .map_err(|_| anyhow::anyhow!("Mock network dropped"))
    }

    async fn disconnect(&self) {
        let mut state = self.network.lock();
        if matches!(&state.current, Some(link) if link.id == self.link_id) {
            state.current = None;
        }
    }
}

struct MockTransportFactory {
    network: MockNetwork,
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_transport(
        &self,
        _url: &str,
        _tls: TlsPolicy,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let delay = {
            let mut state = self.network.lock();
            state.connect_attempts += 1;
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.network.lock();
        if state.refuse_all {
            return Err(anyhow::anyhow!("connection refused"));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(anyhow::anyhow!("connection refused"));
        }

        state.next_link += 1;
        let link_id = state.next_link;
        let (events, rx) = mpsc::channel(100);
        let _ = events.try_send(TransportEvent::Connected);
        state.current = Some(Link {
            id: link_id,
            events,
        });
        let transport: Arc<dyn Transport> = Arc::new(MockTransport {
            network: self.network.clone(),
            link_id,
        });
        Ok((transport, rx))
    }
}

/// Records every event and lets tests wait for specific ones.
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
    tx: mpsc::UnboundedSender<Event>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// Everything seen so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Waits for the next event matching `pred`, skipping others.
    pub async fn wait_for(&self, pred: impl Fn(&Event) -> bool) -> Event {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Next event of any kind.
    pub async fn next(&self) -> Event {
        self.wait_for(|_| true).await
    }
}

impl EventHandler for EventRecorder {
    fn handle_event(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        let _ = self.tx.send(event.clone());
    }
}
