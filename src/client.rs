use crate::calls::{CallError, CallInfo, CallOptions};
use crate::config::{ClientConfig, ConfigError, IceServer};
use crate::connection::ConnectionState;
use crate::dispatcher::{CallReply, Command, Dispatcher, LoopEvent};
use crate::request::{RequestError, RequestIdGenerator, ResponseFuture, SendError};
use crate::transport::{TokioWebSocketTransportFactory, TransportFactory};
use log::debug;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use vertocore::requests::ModifyAction;
use vertocore::types::{CallId, CauseCode, EventHandler};
use vertocore::{Method, Params};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("client has shut down")]
    Shutdown,
}

/// Stops the dispatch loop when the last [`Client`] clone goes away.
struct LoopGuard {
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        let _ = self.loop_tx.send(LoopEvent::Command(Command::Shutdown));
    }
}

/// Handle to a signaling client.
///
/// All work happens on a background dispatch loop; the handle only posts
/// commands to it. Cloning is cheap and every clone drives the same
/// connection. Events are delivered to the [`EventHandler`] passed to
/// [`Client::new`].
#[derive(Clone)]
pub struct Client {
    guard: Arc<LoopGuard>,
    state_rx: watch::Receiver<ConnectionState>,
    session_rx: watch::Receiver<Option<String>>,
    ids: Arc<RequestIdGenerator>,
    config: Arc<ClientConfig>,
}

impl Client {
    /// Creates the client and spawns its dispatch loop. Must be called from
    /// within a tokio runtime. Does not connect.
    pub fn new(
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let config = Arc::new(config);
        let ids = Arc::new(RequestIdGenerator::new());
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (session_tx, session_rx) = watch::channel(None);

        let dispatcher = Dispatcher::new(
            config.clone(),
            ids.clone(),
            factory,
            handler,
            loop_tx.clone(),
            state_tx,
            session_tx,
        );
        tokio::spawn(dispatcher.run(loop_rx));

        Ok(Self {
            guard: Arc::new(LoopGuard { loop_tx }),
            state_rx,
            session_rx,
            ids,
            config,
        })
    }

    /// Same as [`Client::new`] with the tokio-tungstenite WebSocket transport.
    pub fn with_default_transport(
        config: ClientConfig,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, ClientError> {
        Self::new(
            config,
            Arc::new(TokioWebSocketTransportFactory::new()),
            handler,
        )
    }

    fn post(&self, command: Command) -> bool {
        self.guard.loop_tx.send(LoopEvent::Command(command)).is_ok()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// ICE servers for the media engine.
    pub fn ice_servers(&self) -> &[IceServer] {
        &self.config.ice_servers
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Server-confirmed session id, once logged in.
    pub fn session_id(&self) -> Option<String> {
        self.session_rx.borrow().clone()
    }

    /// Starts connecting. Completion is reported through `Event::Connected`.
    pub fn connect(&self) -> Result<(), ClientError> {
        if self.post(Command::Connect) {
            Ok(())
        } else {
            Err(ClientError::Shutdown)
        }
    }

    /// Disconnects and waits until the link is down. Active calls are ended
    /// and no reconnect follows.
    pub async fn disconnect(&self) {
        let (done, rx) = oneshot::channel();
        if !self.post(Command::Disconnect { done }) {
            debug!(target: "Verto/Connection", "Disconnect requested after shutdown");
            return;
        }
        let _ = rx.await;
    }

    /// Sends a request and returns a future for its response.
    ///
    /// Fails right away with [`SendError::NotConnected`] while the client is
    /// not connected; nothing is queued.
    pub fn send_request(
        &self,
        method: Method,
        params: Params,
    ) -> Result<ResponseFuture, RequestError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected.into());
        }
        let id = self.ids.next_id();
        let (reply, rx) = oneshot::channel();
        let command = Command::Request {
            id: id.clone(),
            method,
            params,
            reply,
        };
        if !self.post(command) {
            return Err(RequestError::InternalChannelClosed);
        }
        Ok(ResponseFuture::new(id, rx))
    }

    pub async fn request(&self, method: Method, params: Params) -> Result<Value, RequestError> {
        self.send_request(method, params)?.await
    }

    /// Sends a message without an id. No response is expected.
    pub fn notify(&self, method: Method, params: Params) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        if self.post(Command::Notify { method, params }) {
            Ok(())
        } else {
            Err(SendError::NotConnected)
        }
    }

    async fn call_command<T>(
        &self,
        build: impl FnOnce(CallReply<T>) -> Command,
    ) -> Result<T, CallError> {
        let (reply, rx) = oneshot::channel();
        if !self.post(build(reply)) {
            return Err(CallError::Shutdown);
        }
        rx.await.unwrap_or(Err(CallError::Shutdown))
    }

    /// Dials `options.destination_number`. Requires an established session.
    pub async fn new_call(&self, options: CallOptions) -> Result<CallId, CallError> {
        self.call_command(|reply| Command::NewCall { options, reply })
            .await
    }

    /// Answers a ringing inbound call with the local session description.
    pub async fn answer(&self, call_id: CallId, sdp: impl Into<String>) -> Result<(), CallError> {
        let sdp = sdp.into();
        self.call_command(|reply| Command::Answer {
            call_id,
            sdp,
            reply,
        })
        .await
    }

    pub async fn hangup(&self, call_id: CallId, cause: CauseCode) -> Result<(), CallError> {
        self.call_command(|reply| Command::Hangup {
            call_id,
            cause,
            reply,
        })
        .await
    }

    pub async fn hold(&self, call_id: CallId) -> Result<(), CallError> {
        self.call_command(|reply| Command::Modify {
            call_id,
            action: ModifyAction::Hold,
            reply,
        })
        .await
    }

    pub async fn unhold(&self, call_id: CallId) -> Result<(), CallError> {
        self.call_command(|reply| Command::Modify {
            call_id,
            action: ModifyAction::Unhold,
            reply,
        })
        .await
    }

    /// Snapshot of the calls currently in the call table.
    pub async fn calls(&self) -> Vec<CallInfo> {
        let (reply, rx) = oneshot::channel();
        if !self.post(Command::Calls { reply }) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}
