//! JSON-RPC message envelope and its text codec.
//!
//! Every message on the signaling socket is a JSON object of the form
//!
//! ```text
//! { "jsonrpc": "2.0", "id": <string|int>, "method": <verb>, "params": {...} }
//! { "jsonrpc": "2.0", "id": <string|int>, "result": <any> }
//! { "jsonrpc": "2.0", "id": <string|int|null>, "error": { "code": <int>, "message": <string> } }
//! ```
//!
//! A [`Message`] always carries exactly one of the three payload shapes; the
//! type makes the other combinations unrepresentable.

use crate::error::{DecodeError, ProtocolError};
use crate::method::Method;
use log::debug;
use serde_json::{Map, Value};
use std::fmt;

const PROTOCOL_VERSION: &str = "2.0";

/// Request parameters: a string-keyed map of arbitrary JSON values.
pub type Params = Map<String, Value>;

/// Correlation identifier linking a request to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    Text(String),
    Number(i64),
}

impl MessageId {
    fn to_value(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Number(n) => Value::from(*n),
        }
    }

    fn from_value(value: &Value) -> Result<Option<Self>, DecodeError> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(Self::Text(s.clone()))),
            Value::Number(n) => n.as_i64().map(|n| Some(Self::Number(n))).ok_or(
                DecodeError::InvalidField {
                    field: "id",
                    expected: "string or integer",
                },
            ),
            _ => Err(DecodeError::InvalidField {
                field: "id",
                expected: "string or integer",
            }),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// The populated part of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A request (with id) or a notification (without id).
    Request { method: Method, params: Params },
    /// Success response.
    Result(Value),
    /// Failure response.
    Error(ProtocolError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<MessageId>,
    pub payload: Payload,
}

impl Message {
    pub fn request(id: impl Into<MessageId>, method: Method, params: Params) -> Self {
        Self {
            id: Some(id.into()),
            payload: Payload::Request { method, params },
        }
    }

    /// A request without an id. The peer never answers it.
    pub fn notification(method: Method, params: Params) -> Self {
        Self {
            id: None,
            payload: Payload::Request { method, params },
        }
    }

    pub fn result(id: MessageId, result: Value) -> Self {
        Self {
            id: Some(id),
            payload: Payload::Result(result),
        }
    }

    pub fn error(id: Option<MessageId>, error: ProtocolError) -> Self {
        Self {
            id,
            payload: Payload::Error(error),
        }
    }

    pub fn method(&self) -> Option<&Method> {
        match &self.payload {
            Payload::Request { method, .. } => Some(method),
            _ => None,
        }
    }

    pub fn params(&self) -> Option<&Params> {
        match &self.payload {
            Payload::Request { params, .. } => Some(params),
            _ => None,
        }
    }

    pub fn is_response(&self) -> bool {
        !matches!(self.payload, Payload::Request { .. })
    }

    /// The call this message refers to, if any.
    ///
    /// Server messages put `callID` at the top level of `params`; messages
    /// built by clients nest it under `dialogParams`. Both are accepted.
    pub fn call_id(&self) -> Option<&str> {
        let params = self.params()?;
        params
            .get("callID")
            .and_then(Value::as_str)
            .or_else(|| {
                params
                    .get("dialogParams")
                    .and_then(|d| d.get("callID"))
                    .and_then(Value::as_str)
            })
    }

    /// Serialize to wire text.
    ///
    /// Object keys are emitted in sorted order, so equal messages always
    /// produce identical text.
    pub fn encode(&self) -> String {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(PROTOCOL_VERSION));
        if let Some(id) = &self.id {
            obj.insert("id".into(), id.to_value());
        }
        match &self.payload {
            Payload::Request { method, params } => {
                obj.insert("method".into(), Value::from(method.as_str()));
                obj.insert("params".into(), Value::Object(params.clone()));
            }
            Payload::Result(result) => {
                obj.insert("result".into(), result.clone());
            }
            Payload::Error(err) => {
                let mut e = Map::new();
                e.insert("code".into(), Value::from(err.code));
                e.insert("message".into(), Value::from(err.message.as_str()));
                if let Some(data) = &err.data {
                    e.insert("data".into(), data.clone());
                }
                obj.insert("error".into(), Value::Object(e));
            }
        }
        Value::Object(obj).to_string()
    }

    /// Parse wire text.
    ///
    /// Unrecognized methods are not an error: they decode as
    /// [`Method::Unknown`] so the caller can still observe them.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let id = match obj.get("id") {
            Some(v) => MessageId::from_value(v)?,
            None => None,
        };

        let method = match obj.get("method") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                return Err(DecodeError::InvalidField {
                    field: "method",
                    expected: "string",
                });
            }
        };
        let result = obj.get("result");
        let error = obj.get("error");

        let populated = [method.is_some(), result.is_some(), error.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
        if populated > 1 {
            return Err(DecodeError::AmbiguousPayload);
        }

        let payload = if let Some(name) = method {
            let params = match obj.get("params") {
                None | Some(Value::Null) => Params::new(),
                Some(Value::Object(p)) => p.clone(),
                Some(_) => {
                    return Err(DecodeError::InvalidField {
                        field: "params",
                        expected: "object",
                    });
                }
            };
            let method = Method::from_wire(name);
            if !method.is_known() {
                debug!(target: "Verto/Codec", "Decoded message with unknown method {name}");
            }
            Payload::Request { method, params }
        } else if let Some(result) = result {
            if id.is_none() {
                return Err(DecodeError::MissingField("id"));
            }
            Payload::Result(result.clone())
        } else if let Some(error) = error {
            Payload::Error(decode_error_object(error)?)
        } else if obj.contains_key("params") {
            return Err(DecodeError::MissingField("method"));
        } else {
            return Err(DecodeError::EmptyPayload);
        };

        Ok(Self { id, payload })
    }
}

fn decode_error_object(value: &Value) -> Result<ProtocolError, DecodeError> {
    let obj = value.as_object().ok_or(DecodeError::InvalidField {
        field: "error",
        expected: "object",
    })?;
    let code = obj
        .get("code")
        .ok_or(DecodeError::MissingField("code"))?
        .as_i64()
        .ok_or(DecodeError::InvalidField {
            field: "code",
            expected: "integer",
        })?;
    let message = obj
        .get("message")
        .ok_or(DecodeError::MissingField("message"))?
        .as_str()
        .ok_or(DecodeError::InvalidField {
            field: "message",
            expected: "string",
        })?
        .to_string();
    Ok(ProtocolError {
        code,
        message,
        data: obj.get("data").cloned(),
    })
}
