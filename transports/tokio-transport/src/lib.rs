/// Tokio-based WebSocket transport for the Verto signaling client.
///
/// This crate provides the `Transport` seam used by `verto-rtc` and a
/// concrete implementation on top of tokio-tungstenite. Signaling messages
/// travel as WebSocket text frames, one JSON document per frame.
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

/// An event produced by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the server.
    TextReceived(String),
    /// The connection was lost. Carries the close reason or error, if any.
    Disconnected(Option<String>),
}

/// Certificate validation policy for the TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsPolicy {
    /// Full certificate and hostname validation.
    #[default]
    Strict,
    /// Accept any certificate. Only for development endpoints.
    Permissive,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one text frame to the server.
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error>;

    /// Closes the connection. No `Disconnected` event is guaranteed afterwards.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Dials `url` and returns the transport along with its stream of events.
    async fn create_transport(
        &self,
        url: &str,
        tls: TlsPolicy,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const MAX_TEXT_SIZE: usize = 2 << 23;
const EVENT_CHANNEL_SIZE: usize = 100;

fn check_url(url: &str) -> Result<(), anyhow::Error> {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Unsupported URL scheme: {url}"))
    }
}

fn check_size(len: usize) -> Result<(), anyhow::Error> {
    if len >= MAX_TEXT_SIZE {
        return Err(anyhow::anyhow!(
            "Message is too large (max: {}, got: {})",
            MAX_TEXT_SIZE,
            len
        ));
    }
    Ok(())
}

/// Tokio-based WebSocket transport
pub struct TokioWebSocketTransport {
    ws_sink: Mutex<Option<WsSink>>,
}

impl TokioWebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Mutex::new(Some(sink)),
        }
    }
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        check_size(text.len())?;

        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        trace!(target: "Verto/Transport", "--> {text}");
        sink.send(Message::text(text.to_string()))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(target: "Verto/Transport", "Error while closing websocket: {e}");
            }
        }
    }
}

/// Factory for creating Tokio WebSocket transports
pub struct TokioWebSocketTransportFactory;

impl TokioWebSocketTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioWebSocketTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn create_transport(
        &self,
        url: &str,
        tls: TlsPolicy,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        check_url(url)?;

        let connector = match tls {
            TlsPolicy::Strict => None,
            TlsPolicy::Permissive => {
                warn!(target: "Verto/Transport", "Certificate validation disabled for {url}");
                let tls = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()
                    .map_err(|e| anyhow::anyhow!("Failed to build TLS connector: {}", e))?;
                Some(Connector::NativeTls(tls))
            }
        };

        info!(target: "Verto/Transport", "Dialing {url}");
        let (client, _response) =
            tokio_tungstenite::connect_async_tls_with_config(url, None, false, connector)
                .await
                .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = client.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let transport: Arc<dyn Transport> = Arc::new(TokioWebSocketTransport::new(sink));

        // Connected goes first so the read pump cannot overtake it.
        let _ = event_tx.send(TransportEvent::Connected).await;
        tokio::task::spawn(read_pump(stream, event_tx));

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                trace!(target: "Verto/Transport", "<-- {}", text.as_str());
                if event_tx
                    .send(TransportEvent::TextReceived(text.as_str().to_string()))
                    .await
                    .is_err()
                {
                    warn!(target: "Verto/Transport", "Event receiver dropped, closing read pump");
                    return;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                warn!(target: "Verto/Transport", "Ignoring binary frame of {} bytes", data.len());
            }
            Some(Ok(Message::Close(frame))) => {
                trace!(target: "Verto/Transport", "Received close frame");
                break frame.map(|f| {
                    format!(
                        "closed by server: {} {}",
                        u16::from(f.code),
                        f.reason.as_str()
                    )
                });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(target: "Verto/Transport", "Error reading from websocket: {e}");
                break Some(e.to_string());
            }
            None => {
                trace!(target: "Verto/Transport", "Websocket stream ended");
                break None;
            }
        }
    };

    let _ = event_tx.send(TransportEvent::Disconnected(reason)).await;
}
