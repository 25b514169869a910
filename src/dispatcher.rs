//! The single dispatch loop.
//!
//! Consumer commands, connect results, transport events, reconnect timers,
//! keep-alive ticks and request timeouts all arrive on one unbounded channel
//! and are handled one at a time by [`Dispatcher::run`]. Nothing else touches
//! connection state, pending requests or the call table.

use crate::calls::{CallError, CallInfo, CallManager, CallOptions, CallTransition};
use crate::config::{ClientConfig, Credentials};
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::keepalive::KeepAliveMonitor;
use crate::request::{RequestError, RequestIdGenerator, ResponseSender, SendError};
use crate::session::{Purpose, SignalingSession};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use log::{debug, error, info, trace, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use uuid::Uuid;
use vertocore::requests::{self, LoginAuth, ModifyAction};
use vertocore::types::{
    CallId, CauseCode, DisconnectReason, Event, EventHandler, GatewayState, TerminationReason,
};
use vertocore::{Message, MessageId, Method, Params, Payload, ProtocolError};

pub(crate) type ConnectResult =
    Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;

pub(crate) enum LoopEvent {
    Command(Command),
    ConnectFinished { generation: u64, result: ConnectResult },
    Transport { generation: u64, event: TransportEvent },
    ReconnectDue { generation: u64 },
    KeepAliveTick { generation: u64 },
    RequestTimeout { id: MessageId },
}

pub(crate) type CallReply<T> = oneshot::Sender<Result<T, CallError>>;

pub(crate) enum Command {
    Connect,
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Request {
        id: MessageId,
        method: Method,
        params: Params,
        reply: ResponseSender,
    },
    Notify {
        method: Method,
        params: Params,
    },
    NewCall {
        options: CallOptions,
        reply: CallReply<CallId>,
    },
    Answer {
        call_id: CallId,
        sdp: String,
        reply: CallReply<()>,
    },
    Hangup {
        call_id: CallId,
        cause: CauseCode,
        reply: CallReply<()>,
    },
    Modify {
        call_id: CallId,
        action: ModifyAction,
        reply: CallReply<()>,
    },
    Calls {
        reply: oneshot::Sender<Vec<CallInfo>>,
    },
    Shutdown,
}

pub(crate) struct Dispatcher {
    config: Arc<ClientConfig>,
    ids: Arc<RequestIdGenerator>,
    connection: ConnectionManager,
    session: SignalingSession,
    keepalive: KeepAliveMonitor,
    calls: CallManager,
    handler: Arc<dyn EventHandler>,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
    session_tx: watch::Sender<Option<String>>,
    /// `sessid` sent with the last login, used if the server does not echo one.
    login_sessid: Option<String>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<ClientConfig>,
        ids: Arc<RequestIdGenerator>,
        factory: Arc<dyn TransportFactory>,
        handler: Arc<dyn EventHandler>,
        loop_tx: mpsc::UnboundedSender<LoopEvent>,
        state_tx: watch::Sender<ConnectionState>,
        session_tx: watch::Sender<Option<String>>,
    ) -> Self {
        let connection = ConnectionManager::new(
            factory,
            config.url().to_string(),
            config.tls,
            config.reconnect.clone(),
            loop_tx.clone(),
            state_tx,
        );
        Self {
            keepalive: KeepAliveMonitor::new(config.keepalive.clone()),
            config,
            ids,
            connection,
            session: SignalingSession::new(),
            calls: CallManager::new(),
            handler,
            loop_tx,
            session_tx,
            login_sessid: None,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<LoopEvent>) {
        info!(target: "Verto/Session", "Dispatch loop started");
        while let Some(event) = rx.recv().await {
            if !self.handle(event).await {
                break;
            }
        }
        info!(target: "Verto/Session", "Dispatch loop stopped");
    }

    /// Returns `false` once the loop should stop.
    async fn handle(&mut self, event: LoopEvent) -> bool {
        match event {
            LoopEvent::Command(Command::Shutdown) => {
                self.user_disconnect().await;
                return false;
            }
            LoopEvent::Command(command) => self.handle_command(command).await,
            LoopEvent::ConnectFinished { generation, result } => {
                let events = self.connection.on_connect_finished(generation, result);
                self.apply_connection_events(events).await;
            }
            LoopEvent::Transport { generation, event } => {
                let events = self.connection.on_transport_event(generation, event);
                self.apply_connection_events(events).await;
            }
            LoopEvent::ReconnectDue { generation } => {
                let events = self.connection.on_reconnect_due(generation);
                self.apply_connection_events(events).await;
            }
            LoopEvent::KeepAliveTick { generation } => self.on_keepalive_tick(generation).await,
            LoopEvent::RequestTimeout { id } => self.on_request_timeout(id).await,
        }
        true
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                let events = self.connection.connect();
                self.apply_connection_events(events).await;
            }
            Command::Disconnect { done } => {
                self.user_disconnect().await;
                let _ = done.send(());
            }
            Command::Request {
                id,
                method,
                params,
                reply,
            } => {
                let timeout = self.config.request_timeout;
                if let Err((e, purpose)) = self
                    .send_request(id, method, params, Purpose::User(reply), timeout)
                    .await
                {
                    if let Purpose::User(reply) = purpose {
                        let _ = reply.send(Err(RequestError::Send(e)));
                    }
                }
            }
            Command::Notify { method, params } => {
                let text = Message::notification(method.clone(), params).encode();
                if let Err(e) = self.connection.send(&text).await {
                    warn!(target: "Verto/Session", "Failed to send {method} notification: {e}");
                }
            }
            Command::NewCall { options, reply } => {
                let _ = reply.send(self.new_call(options).await);
            }
            Command::Answer {
                call_id,
                sdp,
                reply,
            } => {
                let _ = reply.send(self.answer(call_id, &sdp).await);
            }
            Command::Hangup {
                call_id,
                cause,
                reply,
            } => {
                let _ = reply.send(self.hangup(call_id, cause.into()).await);
            }
            Command::Modify {
                call_id,
                action,
                reply,
            } => {
                let _ = reply.send(self.modify(call_id, action).await);
            }
            Command::Calls { reply } => {
                let _ = reply.send(self.calls.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn emit(&self, event: Event) {
        trace!(target: "Verto/Session", "Event: {event:?}");
        self.handler.handle_event(&event);
    }

    fn emit_all(&self, events: Vec<Event>) {
        for event in events {
            self.emit(event);
        }
    }

    async fn apply_connection_events(&mut self, events: Vec<ConnectionEvent>) {
        for event in events {
            match event {
                ConnectionEvent::Connected => {
                    self.emit(Event::Connected);
                    self.keepalive
                        .start(self.connection.generation(), self.loop_tx.clone());
                    self.login().await;
                }
                ConnectionEvent::Disconnected(reason) => {
                    self.link_down();
                    self.emit(Event::Disconnected(reason));
                }
                ConnectionEvent::MessageReceived(text) => self.handle_text(&text).await,
                ConnectionEvent::TransportError(e) => self.emit(Event::TransportError(e)),
                ConnectionEvent::Reconnecting { attempt, delay } => {
                    self.emit(Event::Reconnecting { attempt, delay })
                }
                ConnectionEvent::ConnectionLost { attempts } => {
                    self.emit(Event::ConnectionLost { attempts })
                }
            }
        }
    }

    /// Everything tied to a live link goes when it drops. Calls stay in the
    /// table; only an explicit disconnect ends them.
    fn link_down(&mut self) {
        self.keepalive.stop();
        let failed = self.session.fail_all();
        if failed > 0 {
            info!(target: "Verto/Session", "Failed {failed} pending requests on disconnect");
        }
        self.session.set_session_id(None);
        self.session_tx.send_replace(None);
        self.login_sessid = None;
    }

    async fn user_disconnect(&mut self) {
        for call_id in self.calls.active_ids() {
            self.end_call(call_id, CauseCode::NormalClearing.into());
            self.send_bye(call_id, &CauseCode::NormalClearing.into())
                .await;
        }
        let events = self.connection.disconnect().await;
        self.link_down();
        self.apply_connection_events(events).await;
    }

    fn spawn_timeout(&self, id: MessageId, timeout: Duration) -> AbortHandle {
        let loop_tx = self.loop_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = loop_tx.send(LoopEvent::RequestTimeout { id });
        })
        .abort_handle()
    }

    /// Registers and sends a request. On failure the purpose is handed back
    /// so the caller can complete it.
    async fn send_request(
        &mut self,
        id: MessageId,
        method: Method,
        params: Params,
        purpose: Purpose,
        timeout: Duration,
    ) -> Result<(), (SendError, Purpose)> {
        if !self.connection.is_connected() {
            return Err((SendError::NotConnected, purpose));
        }
        let text = Message::request(id.clone(), method.clone(), params).encode();
        let timer = self.spawn_timeout(id.clone(), timeout);
        self.session.register(id.clone(), method, purpose, Some(timer));

        if let Err(e) = self.connection.send(&text).await {
            warn!(target: "Verto/Session", "Failed to send request {id}: {e}");
            return match self.session.take(&id) {
                Some(pending) => Err((e, pending.purpose)),
                None => Err((e, Purpose::KeepAlive)),
            };
        }
        Ok(())
    }

    async fn send_reply(&self, message: Message) {
        if let Err(e) = self.connection.send(&message.encode()).await {
            warn!(target: "Verto/Session", "Failed to reply to {:?}: {e}", message.id);
        }
    }

    async fn login(&mut self) {
        let Some(credentials) = self.config.credentials.clone() else {
            debug!(target: "Verto/Session", "No credentials configured, skipping login");
            return;
        };
        let sessid = Uuid::new_v4().to_string();
        let auth = match &credentials {
            Credentials::SipUser { user, password } => LoginAuth::SipUser { user, password },
            Credentials::Token(token) => LoginAuth::Token(token),
        };
        let params = requests::login(auth, &sessid, &self.config.user_agent);
        self.login_sessid = Some(sessid);

        info!(target: "Verto/Session", "Logging in");
        let id = self.ids.next_id();
        let timeout = self.config.request_timeout;
        if let Err((e, _)) = self
            .send_request(id, Method::Login, params, Purpose::Login, timeout)
            .await
        {
            error!(target: "Verto/Session", "Failed to send login: {e}");
            self.emit(Event::TransportError(e.to_string()));
        }
    }

    async fn on_keepalive_tick(&mut self, generation: u64) {
        if generation != self.connection.generation()
            || !self.connection.is_connected()
            || !self.keepalive.should_ping()
        {
            return;
        }
        let id = self.ids.next_id();
        let timeout = self.keepalive.timeout();
        match self
            .send_request(id.clone(), Method::Ping, Params::new(), Purpose::KeepAlive, timeout)
            .await
        {
            Ok(()) => self.keepalive.ping_sent(id),
            Err((e, _)) => warn!(target: "Verto/Keepalive", "Keepalive ping failed: {e}"),
        }
    }

    async fn on_request_timeout(&mut self, id: MessageId) {
        let Some(pending) = self.session.take(&id) else {
            return;
        };
        warn!(target: "Verto/Session", "Request {id} ({}) timed out", pending.method);
        match pending.purpose {
            Purpose::User(reply) => {
                let _ = reply.send(Err(RequestError::Timeout));
            }
            Purpose::KeepAlive => {
                self.keepalive.ping_timed_out(&id);
                let events = self
                    .connection
                    .connection_lost(DisconnectReason::KeepAliveTimeout);
                self.apply_connection_events(events).await;
            }
            Purpose::Login => {
                error!(target: "Verto/Session", "Login request timed out");
            }
            Purpose::Invite(call_id) => {
                let mut reason = TerminationReason::from(CauseCode::NormalTemporaryFailure);
                reason.sip_reason = Some("invite timed out".to_string());
                self.end_call(call_id, reason);
            }
            Purpose::Answer(_) | Purpose::Modify(..) | Purpose::Bye(_) => {}
        }
    }

    async fn handle_text(&mut self, text: &str) {
        trace!(target: "Verto/Session", "<-- {text}");
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(target: "Verto/Codec", "Dropping undecodable message: {e}");
                return;
            }
        };
        let call_id = message.call_id().and_then(|raw| raw.parse::<CallId>().ok());
        match message.payload {
            Payload::Result(result) => self.on_response(message.id, Ok(result)),
            Payload::Error(error) => self.on_response(message.id, Err(error)),
            Payload::Request { method, params } => {
                self.on_server_request(message.id, method, params, call_id)
                    .await
            }
        }
    }

    fn on_response(&mut self, id: Option<MessageId>, outcome: Result<Value, ProtocolError>) {
        let Some(pending) = id.as_ref().and_then(|id| self.session.take(id)) else {
            match outcome {
                Err(e) => {
                    warn!(target: "Verto/Session", "Unsolicited error response {id:?}: {e}");
                    self.emit(Event::ServerError(e));
                }
                Ok(_) => debug!(target: "Verto/Session", "Dropping unsolicited result {id:?}"),
            }
            return;
        };

        match pending.purpose {
            Purpose::User(reply) => {
                if reply.send(outcome.map_err(RequestError::Protocol)).is_err() {
                    debug!(target: "Verto/Session", "Caller for {} went away", pending.id);
                }
            }
            Purpose::KeepAlive => self.keepalive.pong_received(&pending.id),
            Purpose::Login => match outcome {
                Ok(result) => {
                    let session_id = result
                        .get("sessid")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| self.login_sessid.clone())
                        .unwrap_or_default();
                    info!(target: "Verto/Session", "Session established: {session_id}");
                    self.session.set_session_id(Some(session_id.clone()));
                    self.session_tx.send_replace(Some(session_id.clone()));
                    self.emit(Event::SessionEstablished { session_id });
                }
                Err(e) => {
                    error!(target: "Verto/Session", "Login rejected: {e}");
                    self.emit(Event::ServerError(e));
                }
            },
            Purpose::Invite(call_id) => match outcome {
                Ok(_) => {
                    let events = self.calls.transition(&call_id, CallTransition::InviteAcked);
                    self.emit_all(events);
                }
                Err(e) => {
                    warn!(target: "Verto/Calls", "Invite for {call_id} rejected: {e}");
                    let mut reason = TerminationReason::from(CauseCode::NormalTemporaryFailure);
                    reason.sip_reason = Some(e.message);
                    self.end_call(call_id, reason);
                }
            },
            Purpose::Modify(call_id, requested) => match outcome {
                Ok(result) => {
                    let action = match result.get("action").and_then(Value::as_str) {
                        Some("hold") => ModifyAction::Hold,
                        Some("unhold") => ModifyAction::Unhold,
                        _ => requested,
                    };
                    let events = self.calls.transition(&call_id, hold_transition(action));
                    self.emit_all(events);
                }
                Err(e) => self.emit(Event::ServerError(e)),
            },
            Purpose::Answer(_) => {
                if let Err(e) = outcome {
                    self.emit(Event::ServerError(e));
                }
            }
            Purpose::Bye(_) => {}
        }
    }

    async fn on_server_request(
        &mut self,
        id: Option<MessageId>,
        method: Method,
        params: Params,
        call_id: Option<CallId>,
    ) {
        let sdp = params.get("sdp").and_then(Value::as_str);
        let mut events = Vec::new();
        match (&method, call_id) {
            (Method::Ping, _) => {
                trace!(target: "Verto/Keepalive", "Answering server ping");
            }
            (Method::Invite, _) => events = self.calls.incoming(&params),
            (Method::Ringing, Some(call_id)) => {
                events = self.calls.transition(&call_id, CallTransition::RingingReceived);
            }
            (Method::Media, Some(call_id)) => {
                if let Some(sdp) = sdp {
                    events = self.calls.remote_description(&call_id, sdp);
                }
            }
            (Method::Answer, Some(call_id)) => {
                if let Some(sdp) = sdp {
                    events = self.calls.remote_description(&call_id, sdp);
                }
                events.extend(self.calls.transition(&call_id, CallTransition::Answered));
            }
            (Method::Bye, Some(call_id)) => {
                self.end_call(call_id, requests::termination_reason(&params));
            }
            (Method::Modify, Some(call_id)) => {
                match params.get("action").and_then(Value::as_str) {
                    Some("hold") => {
                        events = self.calls.transition(&call_id, CallTransition::Hold);
                    }
                    Some("unhold") => {
                        events = self.calls.transition(&call_id, CallTransition::Unhold);
                    }
                    other => {
                        debug!(target: "Verto/Calls", "Ignoring modify action {other:?}");
                    }
                }
            }
            (Method::ClientReady, _) => events.push(Event::ClientReady),
            (Method::GatewayState, _) => {
                match params.get("state").and_then(Value::as_str) {
                    Some(state) => {
                        info!(target: "Verto/Session", "Gateway state: {state}");
                        events.push(Event::GatewayStateChanged(GatewayState::parse(state)));
                    }
                    None => debug!(target: "Verto/Session", "Gateway state message without state"),
                }
            }
            (Method::Unknown(name), _) => {
                warn!(target: "Verto/Session", "Server sent unknown method {name}");
                if let Some(id) = id {
                    let error = ProtocolError::method_not_found(name);
                    self.send_reply(Message::error(Some(id), error)).await;
                }
                return;
            }
            (method, None) if method.is_call_scoped() => {
                debug!(target: "Verto/Calls", "Ignoring {method} without a usable callID");
            }
            (method, _) => {
                debug!(target: "Verto/Session", "No handler for server request {method}");
            }
        }

        if let Some(id) = id {
            self.send_reply(Message::result(id, requests::ack_result(&method)))
                .await;
        }
        self.emit_all(events);
    }

    fn end_call(&mut self, call_id: CallId, reason: TerminationReason) {
        self.session.cancel_for_call(&call_id);
        let events = self.calls.end(&call_id, reason);
        self.emit_all(events);
    }

    /// Best-effort `telnyx_rtc.bye`; failures are only logged.
    async fn send_bye(&mut self, call_id: CallId, reason: &TerminationReason) {
        let Some(session_id) = self.session.session_id().map(str::to_string) else {
            return;
        };
        let params = requests::bye(&session_id, &call_id, reason);
        let id = self.ids.next_id();
        let timeout = self.config.request_timeout;
        if let Err((e, _)) = self
            .send_request(id, Method::Bye, params, Purpose::Bye(call_id), timeout)
            .await
        {
            debug!(target: "Verto/Calls", "Could not send bye for {call_id}: {e}");
        }
    }

    fn require_session(&self) -> Result<String, CallError> {
        if !self.connection.is_connected() {
            return Err(CallError::Send(SendError::NotConnected));
        }
        self.session
            .session_id()
            .map(str::to_string)
            .ok_or(CallError::NoSession)
    }

    async fn new_call(&mut self, options: CallOptions) -> Result<CallId, CallError> {
        let session_id = self.require_session()?;
        let (call_id, events) = self.calls.start_outgoing(&options)?;
        self.emit_all(events);

        let dialog = self.calls.dialog_params(&call_id, &options);
        let params = requests::invite(&session_id, &options.sdp, &dialog, &self.config.user_agent);
        let id = self.ids.next_id();
        let timeout = self.config.request_timeout;
        if let Err((e, _)) = self
            .send_request(id, Method::Invite, params, Purpose::Invite(call_id), timeout)
            .await
        {
            self.end_call(call_id, CauseCode::NormalTemporaryFailure.into());
            return Err(CallError::Send(e));
        }
        Ok(call_id)
    }

    async fn answer(&mut self, call_id: CallId, sdp: &str) -> Result<(), CallError> {
        let session_id = self.require_session()?;
        let dialog = self.calls.prepare_answer(&call_id, sdp)?;
        let params = requests::answer(&session_id, sdp, &dialog, &self.config.user_agent);
        let id = self.ids.next_id();
        let timeout = self.config.request_timeout;
        self.send_request(id, Method::Answer, params, Purpose::Answer(call_id), timeout)
            .await
            .map_err(|(e, _)| CallError::Send(e))?;

        let events = self.calls.transition(&call_id, CallTransition::Answered);
        self.emit_all(events);
        Ok(())
    }

    async fn hangup(&mut self, call_id: CallId, reason: TerminationReason) -> Result<(), CallError> {
        self.calls.check(
            &call_id,
            CallTransition::HangUp {
                reason: reason.clone(),
            },
        )?;
        self.end_call(call_id, reason.clone());
        self.send_bye(call_id, &reason).await;
        Ok(())
    }

    async fn modify(&mut self, call_id: CallId, action: ModifyAction) -> Result<(), CallError> {
        self.calls.check(&call_id, hold_transition(action))?;
        let session_id = self.require_session()?;
        let params = requests::modify(&session_id, &call_id, action);
        let id = self.ids.next_id();
        let timeout = self.config.request_timeout;
        self.send_request(
            id,
            Method::Modify,
            params,
            Purpose::Modify(call_id, action),
            timeout,
        )
        .await
        .map_err(|(e, _)| CallError::Send(e))
    }
}

fn hold_transition(action: ModifyAction) -> CallTransition {
    match action {
        ModifyAction::Hold => CallTransition::Hold,
        ModifyAction::Unhold => CallTransition::Unhold,
    }
}
