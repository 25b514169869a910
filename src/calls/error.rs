//! Call-related error types.

use crate::request::SendError;
use thiserror::Error;
use vertocore::types::CallId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("call not found: {0}")]
    NotFound(CallId),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("call {0} is outbound and can only be answered by the remote side")]
    NotInbound(CallId),

    #[error("call already exists: {0}")]
    AlreadyExists(CallId),

    #[error("no signaling session established")]
    NoSession,

    #[error("destination number is empty")]
    MissingDestination,

    #[error(transparent)]
    Send(#[from] SendError),

    #[error("client has shut down")]
    Shutdown,
}
