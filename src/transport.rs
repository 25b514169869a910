pub use verto_rtc_tokio_transport::{
    TlsPolicy, TokioWebSocketTransportFactory, Transport, TransportEvent, TransportFactory,
};
