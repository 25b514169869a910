//! Call table and lifecycle bookkeeping.
//!
//! The manager never talks to the network. Every operation returns the
//! consumer events it produced; the dispatch loop sends whatever signaling
//! goes with it.

use super::error::CallError;
use super::state::{CallInfo, CallTransition};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use vertocore::Params;
use vertocore::requests::DialogParams;
use vertocore::types::{CallDirection, CallId, CallState, Event, TerminationReason};

/// Parameters for an outbound call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub destination_number: String,
    pub caller_name: String,
    pub caller_number: String,
    /// Local session description produced by the media engine.
    pub sdp: String,
    pub audio: bool,
    pub video: bool,
    pub client_state: Option<String>,
    pub custom_headers: Vec<(String, String)>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            destination_number: String::new(),
            caller_name: String::new(),
            caller_number: String::new(),
            sdp: String::new(),
            audio: true,
            video: false,
            client_state: None,
            custom_headers: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CallManager {
    calls: HashMap<CallId, CallInfo>,
}

impl CallManager {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, call_id: &CallId) -> Option<&CallInfo> {
        self.calls.get(call_id)
    }

    pub fn snapshot(&self) -> Vec<CallInfo> {
        self.calls.values().cloned().collect()
    }

    /// Calls that have not reached a terminal state.
    pub fn active_ids(&self) -> Vec<CallId> {
        self.calls
            .values()
            .filter(|c| !c.state.is_terminal())
            .map(|c| c.call_id)
            .collect()
    }

    /// Creates an outbound call and moves it to `Connecting`.
    pub fn start_outgoing(
        &mut self,
        options: &CallOptions,
    ) -> Result<(CallId, Vec<Event>), CallError> {
        if options.destination_number.trim().is_empty() {
            return Err(CallError::MissingDestination);
        }
        let call_id = CallId::generate();
        if self.calls.contains_key(&call_id) {
            return Err(CallError::AlreadyExists(call_id));
        }

        let mut call = CallInfo::new_outgoing(call_id, options.destination_number.clone());
        call.caller_name = options.caller_name.clone();
        call.caller_number = options.caller_number.clone();
        call.client_state = options.client_state.clone();
        call.local_sdp = Some(options.sdp.clone());
        call.apply_transition(CallTransition::Dial)?;

        info!(target: "Verto/Calls", "Dialing {} as call {call_id}", options.destination_number);
        let state = call.state;
        self.calls.insert(call_id, call);
        Ok((call_id, vec![Event::CallStateChanged { call_id, state }]))
    }

    pub fn dialog_params(&self, call_id: &CallId, options: &CallOptions) -> DialogParams {
        DialogParams {
            call_id: Some(*call_id),
            destination_number: options.destination_number.clone(),
            caller_id_name: options.caller_name.clone(),
            caller_id_number: options.caller_number.clone(),
            remote_caller_id_name: String::new(),
            audio: options.audio,
            video: options.video,
            client_state: options.client_state.clone(),
            custom_headers: options.custom_headers.clone(),
        }
    }

    /// Checks that an inbound call can be answered and records the local
    /// description. The state only changes once the answer is on the wire.
    /// Outbound calls only become active when the remote side answers.
    pub fn prepare_answer(&mut self, call_id: &CallId, sdp: &str) -> Result<DialogParams, CallError> {
        self.check(call_id, CallTransition::Answered)?;
        let call = self
            .calls
            .get_mut(call_id)
            .ok_or(CallError::NotFound(*call_id))?;
        if call.direction != CallDirection::Inbound {
            return Err(CallError::NotInbound(*call_id));
        }
        call.local_sdp = Some(sdp.to_string());
        Ok(DialogParams {
            call_id: Some(*call_id),
            destination_number: call.caller_number.clone(),
            remote_caller_id_name: call.caller_name.clone(),
            audio: true,
            ..Default::default()
        })
    }

    /// Validates `transition` against the call without applying it.
    pub fn check(&self, call_id: &CallId, transition: CallTransition) -> Result<(), CallError> {
        let mut probe = self
            .calls
            .get(call_id)
            .cloned()
            .ok_or(CallError::NotFound(*call_id))?;
        probe.apply_transition(transition)?;
        Ok(())
    }

    /// Handles an inbound `telnyx_rtc.invite`.
    pub fn incoming(&mut self, params: &Params) -> Vec<Event> {
        let Some(raw_id) = params.get("callID").and_then(Value::as_str) else {
            return vec![inconsistency(None, "invite without callID".to_string())];
        };
        let call_id: CallId = match raw_id.parse() {
            Ok(id) => id,
            Err(e) => {
                return vec![inconsistency(
                    None,
                    format!("invite with malformed callID {raw_id}: {e}"),
                )];
            }
        };
        if self.calls.contains_key(&call_id) {
            return vec![inconsistency(
                Some(call_id),
                "duplicate invite for a known call".to_string(),
            )];
        }

        let text = |key: &str| {
            params
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let call = CallInfo::new_incoming(
            call_id,
            text("caller_id_name"),
            text("caller_id_number"),
            text("sdp"),
        );
        info!(
            target: "Verto/Calls",
            "Incoming call {call_id} from {} <{}>", call.caller_name, call.caller_number
        );

        let events = vec![
            Event::IncomingCall {
                call_id,
                caller_name: call.caller_name.clone(),
                caller_number: call.caller_number.clone(),
                remote_sdp: call.remote_sdp.clone().unwrap_or_default(),
            },
            Event::CallStateChanged {
                call_id,
                state: call.state,
            },
        ];
        self.calls.insert(call_id, call);
        events
    }

    /// Applies a signaling-driven transition.
    ///
    /// Unknown calls are ignored; rejected transitions surface as
    /// [`Event::ProtocolInconsistency`].
    pub fn transition(&mut self, call_id: &CallId, transition: CallTransition) -> Vec<Event> {
        let Some(call) = self.calls.get_mut(call_id) else {
            debug!(target: "Verto/Calls", "Ignoring {transition} for unknown call {call_id}");
            return Vec::new();
        };
        let before = call.state;
        match call.apply_transition(transition) {
            Ok(()) if call.state != before => {
                debug!(target: "Verto/Calls", "Call {call_id}: {before:?} -> {:?}", call.state);
                vec![Event::CallStateChanged {
                    call_id: *call_id,
                    state: call.state,
                }]
            }
            Ok(()) => Vec::new(),
            Err(e) => vec![inconsistency(Some(*call_id), e.to_string())],
        }
    }

    /// Records a remote description for the media engine.
    pub fn remote_description(&mut self, call_id: &CallId, sdp: &str) -> Vec<Event> {
        let Some(call) = self.calls.get_mut(call_id) else {
            debug!(target: "Verto/Calls", "Ignoring remote description for unknown call {call_id}");
            return Vec::new();
        };
        if call.state.is_terminal() {
            return Vec::new();
        }
        call.remote_sdp = Some(sdp.to_string());
        vec![Event::RemoteDescription {
            call_id: *call_id,
            sdp: sdp.to_string(),
        }]
    }

    /// Hangs the call up, notifies the consumer and drops it from the table.
    pub fn end(&mut self, call_id: &CallId, reason: TerminationReason) -> Vec<Event> {
        let Some(call) = self.calls.get_mut(call_id) else {
            debug!(target: "Verto/Calls", "Ignoring hangup for unknown call {call_id}");
            return Vec::new();
        };
        if call.state.is_terminal() {
            return Vec::new();
        }
        if let Err(e) = call.apply_transition(CallTransition::HangUp {
            reason: reason.clone(),
        }) {
            return vec![inconsistency(Some(*call_id), e.to_string())];
        }
        info!(target: "Verto/Calls", "Call {call_id} ended: {reason}");

        let mut events = vec![
            Event::CallStateChanged {
                call_id: *call_id,
                state: CallState::Hangup,
            },
            Event::CallEnded {
                call_id: *call_id,
                reason,
            },
        ];
        if call.apply_transition(CallTransition::Cleanup).is_ok() {
            events.push(Event::CallStateChanged {
                call_id: *call_id,
                state: CallState::Done,
            });
        }
        self.calls.remove(call_id);
        events
    }
}

fn inconsistency(call_id: Option<CallId>, detail: String) -> Event {
    warn!(target: "Verto/Calls", "Protocol inconsistency: {detail}");
    Event::ProtocolInconsistency { call_id, detail }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vertocore::types::CauseCode;

    fn invite_params(call_id: &str) -> Params {
        match json!({
            "callID": call_id,
            "sdp": "v=0 remote",
            "caller_id_name": "Alice",
            "caller_id_number": "+15550101",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn options() -> CallOptions {
        CallOptions {
            destination_number: "+15550199".into(),
            sdp: "v=0 local".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_incoming_invite_creates_ringing_call() {
        let mut calls = CallManager::new();
        let id = CallId::generate();
        let events = calls.incoming(&invite_params(&id.to_string()));

        assert!(matches!(
            &events[0],
            Event::IncomingCall { call_id, caller_name, remote_sdp, .. }
                if *call_id == id && caller_name == "Alice" && remote_sdp == "v=0 remote"
        ));
        assert!(matches!(
            events[1],
            Event::CallStateChanged { state: CallState::Ringing, .. }
        ));
        assert_eq!(calls.get(&id).unwrap().state, CallState::Ringing);
    }

    #[test]
    fn test_duplicate_or_malformed_invite_is_inconsistency() {
        let mut calls = CallManager::new();
        let id = CallId::generate();
        calls.incoming(&invite_params(&id.to_string()));

        let events = calls.incoming(&invite_params(&id.to_string()));
        assert!(matches!(
            &events[..],
            [Event::ProtocolInconsistency { call_id: Some(c), .. }] if *c == id
        ));

        let events = calls.incoming(&invite_params("not-a-uuid"));
        assert!(matches!(
            &events[..],
            [Event::ProtocolInconsistency { call_id: None, .. }]
        ));
        assert_eq!(calls.snapshot().len(), 1);
    }

    #[test]
    fn test_unknown_call_is_ignored() {
        let mut calls = CallManager::new();
        let events = calls.transition(&CallId::generate(), CallTransition::RingingReceived);
        assert!(events.is_empty());
        let events = calls.end(&CallId::generate(), CauseCode::NormalClearing.into());
        assert!(events.is_empty());
    }

    #[test]
    fn test_invalid_transition_reports_inconsistency() {
        let mut calls = CallManager::new();
        let (id, _) = calls.start_outgoing(&options()).unwrap();
        let events = calls.transition(&id, CallTransition::Unhold);
        assert!(matches!(
            &events[..],
            [Event::ProtocolInconsistency { call_id: Some(c), .. }] if *c == id
        ));
        assert_eq!(calls.get(&id).unwrap().state, CallState::Connecting);
    }

    #[test]
    fn test_repeated_ringing_emits_once() {
        let mut calls = CallManager::new();
        let (id, events) = calls.start_outgoing(&options()).unwrap();
        assert!(matches!(
            events[..],
            [Event::CallStateChanged { state: CallState::Connecting, .. }]
        ));
        assert_eq!(calls.transition(&id, CallTransition::InviteAcked).len(), 1);
        assert!(calls.transition(&id, CallTransition::RingingReceived).is_empty());
    }

    #[test]
    fn test_end_notifies_and_removes() {
        let mut calls = CallManager::new();
        let (id, _) = calls.start_outgoing(&options()).unwrap();
        let events = calls.end(&id, CauseCode::UserBusy.into());

        assert!(matches!(
            &events[..],
            [
                Event::CallStateChanged { state: CallState::Hangup, .. },
                Event::CallEnded { reason, .. },
                Event::CallStateChanged { state: CallState::Done, .. },
            ] if reason.cause == "USER_BUSY"
        ));
        assert!(calls.get(&id).is_none());
        assert!(calls.end(&id, CauseCode::UserBusy.into()).is_empty());
    }

    #[test]
    fn test_outgoing_requires_destination() {
        let mut calls = CallManager::new();
        let result = calls.start_outgoing(&CallOptions::default());
        assert!(matches!(result, Err(CallError::MissingDestination)));
    }

    #[test]
    fn test_prepare_answer_only_for_ringing_calls() {
        let mut calls = CallManager::new();
        let (outbound, _) = calls.start_outgoing(&options()).unwrap();
        assert!(matches!(
            calls.prepare_answer(&outbound, "v=0"),
            Err(CallError::InvalidTransition(_))
        ));
        calls.transition(&outbound, CallTransition::InviteAcked);
        assert!(matches!(
            calls.prepare_answer(&outbound, "v=0"),
            Err(CallError::NotInbound(id)) if id == outbound
        ));
        assert_eq!(calls.get(&outbound).unwrap().local_sdp.as_deref(), Some("v=0 local"));

        let inbound = CallId::generate();
        calls.incoming(&invite_params(&inbound.to_string()));
        let dialog = calls.prepare_answer(&inbound, "v=0 answer").unwrap();
        assert_eq!(dialog.destination_number, "+15550101");
        assert_eq!(
            calls.get(&inbound).unwrap().local_sdp.as_deref(),
            Some("v=0 answer")
        );
        // Still ringing until the answer is sent.
        assert_eq!(calls.get(&inbound).unwrap().state, CallState::Ringing);
    }
}
