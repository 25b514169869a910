//! Protocol-level error types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Inbound text could not be turned into a [`Message`](crate::Message).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has the wrong type: expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("message carries more than one of method/result/error")]
    AmbiguousPayload,

    #[error("message carries none of method/result/error")]
    EmptyPayload,
}

/// A well-formed error response from the server.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("server error {code}: {message}")]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProtocolError {
    /// JSON-RPC "method not found".
    pub const METHOD_NOT_FOUND: i64 = -32601;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            Self::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }
}
