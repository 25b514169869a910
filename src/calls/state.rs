//! Call state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use vertocore::types::{CallDirection, CallId, CallState, TerminationReason};

/// State transitions for calls.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTransition {
    /// Outbound invite issued.
    Dial,
    /// Server accepted the invite.
    InviteAcked,
    /// `telnyx_rtc.ringing` received.
    RingingReceived,
    /// Answer sent (inbound) or received (outbound).
    Answered,
    Hold,
    Unhold,
    HangUp { reason: TerminationReason },
    /// Internal step once the consumer has been told the call ended.
    Cleanup,
}

impl CallTransition {
    fn name(&self) -> &'static str {
        match self {
            Self::Dial => "dial",
            Self::InviteAcked => "invite-ack",
            Self::RingingReceived => "ringing",
            Self::Answered => "answer",
            Self::Hold => "hold",
            Self::Unhold => "unhold",
            Self::HangUp { .. } => "hangup",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for CallTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot apply {transition} in state {from:?}")]
pub struct InvalidTransition {
    pub from: CallState,
    pub transition: &'static str,
}

/// Full call session information.
#[derive(Debug, Clone, Serialize)]
pub struct CallInfo {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub state: CallState,
    pub caller_name: String,
    pub caller_number: String,
    pub destination_number: String,
    pub client_state: Option<String>,
    /// Opaque session descriptions, carried for the media engine.
    pub local_sdp: Option<String>,
    pub remote_sdp: Option<String>,
    /// Set once the call reaches `Hangup`.
    pub termination: Option<TerminationReason>,
    pub created_at: DateTime<Utc>,
}

impl CallInfo {
    pub fn new_outgoing(call_id: CallId, destination_number: String) -> Self {
        Self {
            call_id,
            direction: CallDirection::Outbound,
            state: CallState::New,
            caller_name: String::new(),
            caller_number: String::new(),
            destination_number,
            client_state: None,
            local_sdp: None,
            remote_sdp: None,
            termination: None,
            created_at: Utc::now(),
        }
    }

    /// Inbound calls start out ringing.
    pub fn new_incoming(
        call_id: CallId,
        caller_name: String,
        caller_number: String,
        remote_sdp: String,
    ) -> Self {
        Self {
            call_id,
            direction: CallDirection::Inbound,
            state: CallState::Ringing,
            caller_name,
            caller_number,
            destination_number: String::new(),
            client_state: None,
            local_sdp: None,
            remote_sdp: Some(remote_sdp),
            termination: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.direction == CallDirection::Outbound
    }

    /// Applies `transition`, leaving the call untouched if it is not allowed.
    ///
    /// Repeated ringing notifications on an already ringing call are
    /// accepted without a state change.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        use CallState::*;

        let next = match (&self.state, &transition) {
            (New, CallTransition::Dial) => Connecting,
            (Connecting, CallTransition::InviteAcked | CallTransition::RingingReceived) => Ringing,
            (Ringing, CallTransition::InviteAcked | CallTransition::RingingReceived) => Ringing,
            (Ringing, CallTransition::Answered) => Active,
            (Active, CallTransition::Hold) => Held,
            (Held, CallTransition::Unhold) => Active,
            (state, CallTransition::HangUp { reason }) if !state.is_terminal() => {
                self.termination = Some(reason.clone());
                Hangup
            }
            (Hangup, CallTransition::Cleanup) => Done,
            (from, _) => {
                return Err(InvalidTransition {
                    from: *from,
                    transition: transition.name(),
                });
            }
        };
        self.state = next;
        Ok(())
    }
}
