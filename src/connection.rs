use crate::config::ReconnectPolicy;
use crate::dispatcher::LoopEvent;
use crate::request::SendError;
use crate::transport::{TlsPolicy, Transport, TransportEvent, TransportFactory};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use vertocore::types::DisconnectReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// What the connection manager reports back to the dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConnectionEvent {
    Connected,
    Disconnected(DisconnectReason),
    MessageReceived(String),
    TransportError(String),
    Reconnecting { attempt: u32, delay: Duration },
    ConnectionLost { attempts: u32 },
}

/// Owns the transport and the reconnect policy.
///
/// Every connect attempt bumps `generation`. Connect results, transport
/// events and reconnect timers carry the generation they were started
/// under; anything from an older generation is discarded, and a transport
/// that finishes connecting after it became stale is closed.
pub(crate) struct ConnectionManager {
    factory: Arc<dyn TransportFactory>,
    url: String,
    tls: TlsPolicy,
    policy: ReconnectPolicy,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
    state_tx: watch::Sender<ConnectionState>,

    state: ConnectionState,
    generation: u64,
    transport: Option<Arc<dyn Transport>>,
    pump: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    /// Consecutive failed or lost connections since the last success.
    attempts: u32,
    auto_reconnect: bool,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        url: String,
        tls: TlsPolicy,
        policy: ReconnectPolicy,
        loop_tx: mpsc::UnboundedSender<LoopEvent>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let auto_reconnect = policy.auto_reconnect;
        Self {
            factory,
            url,
            tls,
            policy,
            loop_tx,
            state_tx,
            state: ConnectionState::Disconnected,
            generation: 0,
            transport: None,
            pump: None,
            connect_task: None,
            reconnect_timer: None,
            attempts: 0,
            auto_reconnect,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(target: "Verto/Connection", "{:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Starts connecting. Completion arrives later as `Connected`.
    pub fn connect(&mut self) -> Vec<ConnectionEvent> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                warn!(target: "Verto/Connection", "Connect requested but already {:?}", self.state);
                return Vec::new();
            }
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {}
        }
        self.auto_reconnect = self.policy.auto_reconnect;
        self.attempts = 0;
        self.cancel_reconnect_timer();
        self.start_attempt();
        Vec::new()
    }

    fn start_attempt(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.set_state(ConnectionState::Connecting);
        info!(target: "Verto/Connection", "Connecting to {} (generation {generation})", self.url);

        let factory = self.factory.clone();
        let url = self.url.clone();
        let tls = self.tls;
        let loop_tx = self.loop_tx.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let result = factory.create_transport(&url, tls).await;
            let _ = loop_tx.send(LoopEvent::ConnectFinished { generation, result });
        }));
    }

    pub fn on_connect_finished(
        &mut self,
        generation: u64,
        result: Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>,
    ) -> Vec<ConnectionEvent> {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            debug!(
                target: "Verto/Connection",
                "Discarding stale connect result (generation {generation}, current {})",
                self.generation
            );
            if let Ok((transport, _events)) = result {
                tokio::spawn(async move { transport.disconnect().await });
            }
            return Vec::new();
        }
        self.connect_task = None;

        match result {
            Ok((transport, events)) => {
                info!(target: "Verto/Connection", "Connected to {}", self.url);
                self.transport = Some(transport);
                self.pump = Some(spawn_pump(generation, events, self.loop_tx.clone()));
                self.attempts = 0;
                self.set_state(ConnectionState::Connected);
                vec![ConnectionEvent::Connected]
            }
            Err(e) => {
                error!(target: "Verto/Connection", "Connection failed: {e}");
                self.set_state(ConnectionState::Disconnected);
                let mut events = vec![ConnectionEvent::TransportError(e.to_string())];
                events.extend(self.schedule_reconnect());
                events
            }
        }
    }

    pub fn on_transport_event(
        &mut self,
        generation: u64,
        event: TransportEvent,
    ) -> Vec<ConnectionEvent> {
        if generation != self.generation || self.state != ConnectionState::Connected {
            trace!(target: "Verto/Connection", "Ignoring stale transport event {event:?}");
            return Vec::new();
        }
        match event {
            TransportEvent::Connected => Vec::new(),
            TransportEvent::TextReceived(text) => vec![ConnectionEvent::MessageReceived(text)],
            TransportEvent::Disconnected(reason) => {
                let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                warn!(target: "Verto/Connection", "Transport disconnected: {reason}");
                self.connection_lost(DisconnectReason::TransportError(reason))
            }
        }
    }

    /// Tears the link down after an unexpected loss and schedules a reconnect.
    pub fn connection_lost(&mut self, reason: DisconnectReason) -> Vec<ConnectionEvent> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        self.teardown();
        self.set_state(ConnectionState::Disconnected);
        let mut events = vec![ConnectionEvent::Disconnected(reason.clone())];
        if reason.should_reconnect() {
            events.extend(self.schedule_reconnect());
        }
        events
    }

    fn schedule_reconnect(&mut self) -> Vec<ConnectionEvent> {
        if !self.auto_reconnect {
            info!(target: "Verto/Connection", "Auto-reconnect disabled, staying disconnected.");
            return Vec::new();
        }
        self.attempts += 1;
        if self.attempts > self.policy.max_attempts {
            error!(
                target: "Verto/Connection",
                "Giving up after {} reconnect attempts", self.policy.max_attempts
            );
            self.attempts = 0;
            return vec![ConnectionEvent::ConnectionLost {
                attempts: self.policy.max_attempts,
            }];
        }

        let attempt = self.attempts;
        let delay = self.policy.delay_for(attempt);
        info!(
            target: "Verto/Connection",
            "Will attempt to reconnect in {delay:?} (attempt {attempt})"
        );
        let generation = self.generation;
        let loop_tx = self.loop_tx.clone();
        self.cancel_reconnect_timer();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = loop_tx.send(LoopEvent::ReconnectDue { generation });
        }));
        vec![ConnectionEvent::Reconnecting { attempt, delay }]
    }

    pub fn on_reconnect_due(&mut self, generation: u64) -> Vec<ConnectionEvent> {
        if generation != self.generation
            || self.state != ConnectionState::Disconnected
            || self.reconnect_timer.is_none()
        {
            debug!(target: "Verto/Connection", "Ignoring stale reconnect timer");
            return Vec::new();
        }
        self.reconnect_timer = None;
        self.start_attempt();
        Vec::new()
    }

    /// User-initiated disconnect. Cancels any retry and never reconnects.
    pub async fn disconnect(&mut self) -> Vec<ConnectionEvent> {
        let previous = self.state;
        self.auto_reconnect = false;
        self.cancel_reconnect_timer();
        if let Some(task) = self.connect_task.take() {
            debug!(target: "Verto/Connection", "Cancelling in-flight connect attempt");
            task.abort();
        }
        // Anything still in flight belongs to a dead generation from now on.
        self.generation += 1;

        self.set_state(ConnectionState::Disconnecting);
        if let Some(transport) = self.teardown() {
            transport.disconnect().await;
        }
        self.set_state(ConnectionState::Disconnected);
        self.attempts = 0;

        match previous {
            ConnectionState::Connected | ConnectionState::Connecting => {
                info!(target: "Verto/Connection", "Disconnected by user");
                vec![ConnectionEvent::Disconnected(DisconnectReason::UserInitiated)]
            }
            ConnectionState::Disconnected | ConnectionState::Disconnecting => Vec::new(),
        }
    }

    /// Sends one message. Never queues.
    pub async fn send(&self, text: &str) -> Result<(), SendError> {
        let transport = match (&self.transport, self.state) {
            (Some(transport), ConnectionState::Connected) => transport,
            _ => return Err(SendError::NotConnected),
        };
        trace!(target: "Verto/Connection", "--> {text}");
        transport
            .send_text(text)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    /// Drops the transport and its pump. The caller decides whether to close
    /// the transport gracefully.
    fn teardown(&mut self) -> Option<Arc<dyn Transport>> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        let transport = self.transport.take();
        if let Some(transport) = &transport {
            let transport = transport.clone();
            if self.state == ConnectionState::Connected {
                // Unexpected losses close in the background; the user path
                // awaits the close itself.
                tokio::spawn(async move { transport.disconnect().await });
            }
        }
        transport
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel_reconnect_timer();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Forwards transport events into the dispatch loop, tagged with the
/// connection generation.
fn spawn_pump(
    generation: u64,
    mut events: mpsc::Receiver<TransportEvent>,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Some(event) => event,
                None => TransportEvent::Disconnected(Some("event stream closed".to_string())),
            };
            let done = matches!(event, TransportEvent::Disconnected(_));
            if loop_tx
                .send(LoopEvent::Transport { generation, event })
                .is_err()
                || done
            {
                return;
            }
        }
    })
}
