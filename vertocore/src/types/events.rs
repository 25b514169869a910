use crate::error::ProtocolError;
use crate::types::call::{CallId, CallState, GatewayState, TerminationReason};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Why the signaling connection went down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    /// The consumer asked for it. Never followed by a reconnect.
    UserInitiated,
    /// The transport closed or failed underneath us.
    TransportError(String),
    /// No keep-alive response within the timeout window.
    KeepAliveTimeout,
}

impl DisconnectReason {
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, Self::UserInitiated)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserInitiated => f.write_str("disconnected by user"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::KeepAliveTimeout => f.write_str("keep-alive timeout"),
        }
    }
}

/// Notification delivered to the consumer.
///
/// Events are emitted from the client's dispatch loop, one at a time and in
/// the order things happened.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    Connected,
    Disconnected(DisconnectReason),
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect attempts are exhausted. The client stays disconnected.
    ConnectionLost { attempts: u32 },
    /// A transport-level failure (connect attempt failed, send failed).
    TransportError(String),
    /// The server returned an error no pending request was waiting for.
    ServerError(ProtocolError),

    SessionEstablished { session_id: String },
    ClientReady,
    GatewayStateChanged(GatewayState),

    IncomingCall {
        call_id: CallId,
        caller_name: String,
        caller_number: String,
        remote_sdp: String,
    },
    CallStateChanged { call_id: CallId, state: CallState },
    /// Remote session description for the media engine (answer or early media).
    RemoteDescription { call_id: CallId, sdp: String },
    CallEnded {
        call_id: CallId,
        reason: TerminationReason,
    },
    /// The server sent something that does not fit the call's current state.
    ProtocolInconsistency {
        call_id: Option<CallId>,
        detail: String,
    },
}

/// Consumer of [`Event`]s.
///
/// Handlers run on the dispatch loop and must not block.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle_event(&self, event: &Event) {
        self(event)
    }
}
