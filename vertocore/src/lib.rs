//! Runtime-agnostic core of the Verto signaling client.
//!
//! Everything here is plain data and pure functions: the JSON-RPC message
//! codec, the protocol verbs, call identifiers and the consumer event types.
//! The tokio runtime layer lives in the `verto-rtc` crate.

pub mod error;
pub mod message;
pub mod method;
pub mod requests;
pub mod types;

pub use error::{DecodeError, ProtocolError};
pub use message::{Message, MessageId, Params, Payload};
pub use method::Method;
