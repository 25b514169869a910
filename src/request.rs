use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;
use vertocore::{MessageId, ProtocolError};

/// Failure to hand a message to the connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("Client is not connected")]
    NotConnected,
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Custom error types for request operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("Received a server error response: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Connection lost before a response arrived")]
    ConnectionLost,
    #[error("Request timed out")]
    Timeout,
    #[error("Internal channel closed unexpectedly")]
    InternalChannelClosed,
}

pub(crate) type ResponseSender = oneshot::Sender<Result<Value, RequestError>>;

/// Generates correlation ids of the form `<prefix>-<counter>`.
///
/// The random prefix keeps ids from two client instances apart in server
/// logs; the counter makes them unique within one instance.
#[derive(Debug)]
pub struct RequestIdGenerator {
    unique_id: String,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        let bytes: [u8; 2] = rand::random();
        Self {
            unique_id: format!("{}.{}", bytes[0], bytes[1]),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> MessageId {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        MessageId::Text(format!("{}-{}", self.unique_id, count))
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves with the result of one outbound request.
///
/// Dropping it does not cancel the request; the response is discarded when
/// it arrives.
#[derive(Debug)]
pub struct ResponseFuture {
    id: MessageId,
    rx: oneshot::Receiver<Result<Value, RequestError>>,
}

impl ResponseFuture {
    pub(crate) fn new(id: MessageId, rx: oneshot::Receiver<Result<Value, RequestError>>) -> Self {
        Self { id, rx }
    }

    /// Correlation id the request went out with.
    pub fn id(&self) -> &MessageId {
        &self.id
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(RequestError::InternalChannelClosed)))
    }
}
