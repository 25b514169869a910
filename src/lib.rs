// Protocol core: codec, verbs, call ids and consumer events
pub use vertocore::{self, Message, MessageId, Method, Params, Payload, ProtocolError};

pub mod types {
    pub use vertocore::types::*;
}

pub mod calls;
pub mod client;
pub mod config;
pub mod connection;
mod dispatcher;
mod keepalive;
pub mod request;
mod session;
pub mod transport;

// Mock transport for driving a client without a network
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::{Client, ClientError};
pub use config::{ClientConfig, Credentials, Environment, KeepAliveConfig, ReconnectPolicy};
pub use connection::ConnectionState;
pub use request::{RequestError, ResponseFuture, SendError};
pub use types::{Event, EventHandler};
