//! Parameter builders for the outbound verbs.
//!
//! The key names (and their inconsistent casing) are what the signaling
//! server expects; do not normalize them.

use crate::message::Params;
use crate::method::Method;
use crate::types::call::{CallId, TerminationReason};
use serde_json::{Value, json};

/// Credentials carried by a `login` request.
#[derive(Debug, Clone, Copy)]
pub enum LoginAuth<'a> {
    SipUser { user: &'a str, password: &'a str },
    Token(&'a str),
}

/// Hold actions for `telnyx_rtc.modify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyAction {
    Hold,
    Unhold,
}

impl ModifyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Unhold => "unhold",
        }
    }
}

/// The `dialogParams` object describing one call.
#[derive(Debug, Clone, Default)]
pub struct DialogParams {
    pub call_id: Option<CallId>,
    pub destination_number: String,
    pub caller_id_name: String,
    pub caller_id_number: String,
    pub remote_caller_id_name: String,
    pub audio: bool,
    pub video: bool,
    pub client_state: Option<String>,
    pub custom_headers: Vec<(String, String)>,
}

impl DialogParams {
    fn to_value(&self) -> Value {
        let mut dialog = json!({
            "destination_number": self.destination_number,
            "caller_id_name": self.caller_id_name,
            "caller_id_number": self.caller_id_number,
            "remote_caller_id_name": self.remote_caller_id_name,
            "audio": self.audio,
            "video": self.video,
            "useStereo": false,
            "attach": false,
            "screenShare": false,
            "userVariables": {},
        });
        if let Some(call_id) = &self.call_id {
            dialog["callID"] = json!(call_id.to_string());
        }
        if let Some(state) = &self.client_state {
            dialog["clientState"] = json!(state);
        }
        if !self.custom_headers.is_empty() {
            dialog["custom_headers"] = self
                .custom_headers
                .iter()
                .map(|(name, value)| json!({ "name": name, "value": value }))
                .collect();
        }
        dialog
    }
}

fn into_params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

pub fn login(auth: LoginAuth<'_>, session_id: &str, user_agent: &str) -> Params {
    let mut params = json!({
        "User-Agent": user_agent,
        "sessid": session_id,
        "from_push": false,
        "loginParams": { "attach_call": "true" },
        "userVariables": {},
    });
    match auth {
        LoginAuth::SipUser { user, password } => {
            params["login"] = json!(user);
            params["passwd"] = json!(password);
        }
        LoginAuth::Token(token) => {
            params["login_token"] = json!(token);
        }
    }
    into_params(params)
}

pub fn invite(session_id: &str, sdp: &str, dialog: &DialogParams, user_agent: &str) -> Params {
    into_params(json!({
        "User-Agent": user_agent,
        "sessionId": session_id,
        "sdp": sdp,
        "dialogParams": dialog.to_value(),
    }))
}

pub fn answer(session_id: &str, sdp: &str, dialog: &DialogParams, user_agent: &str) -> Params {
    into_params(json!({
        "User-Agent": user_agent,
        "sessionId": session_id,
        "sdp": sdp,
        "dialogParams": dialog.to_value(),
    }))
}

pub fn bye(session_id: &str, call_id: &CallId, reason: &TerminationReason) -> Params {
    let mut params = json!({
        "sessId": session_id,
        "cause": reason.cause,
        "dialogParams": { "callID": call_id.to_string() },
    });
    if let Some(code) = reason.cause_code {
        params["causeCode"] = json!(code);
    }
    if let Some(sip_code) = reason.sip_code {
        params["sipCode"] = json!(sip_code);
    }
    if let Some(sip_reason) = &reason.sip_reason {
        params["sipReason"] = json!(sip_reason);
    }
    into_params(params)
}

pub fn modify(session_id: &str, call_id: &CallId, action: ModifyAction) -> Params {
    into_params(json!({
        "sessionId": session_id,
        "action": action.as_str(),
        "dialogParams": { "callID": call_id.to_string() },
    }))
}

/// Result body used to acknowledge a server-initiated request.
pub fn ack_result(method: &Method) -> Value {
    json!({ "method": method.as_str() })
}

/// Reads the hangup reason out of an inbound `telnyx_rtc.bye`.
pub fn termination_reason(params: &Params) -> TerminationReason {
    let cause_code = params.get("causeCode").and_then(Value::as_i64);
    let cause = params
        .get("cause")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            cause_code
                .and_then(crate::types::CauseCode::from_code)
                .map(|c| c.cause().to_string())
        })
        .unwrap_or_else(|| "NORMAL_CLEARING".to_string());
    TerminationReason {
        cause,
        cause_code,
        sip_code: params.get("sipCode").and_then(Value::as_i64),
        sip_reason: params
            .get("sipReason")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
