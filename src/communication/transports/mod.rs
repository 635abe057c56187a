pub mod inmem;
// WebSockets transport (native backend via features)
#[cfg(feature = "ws_transport")]
pub mod websockets;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("{0}")]
    Io(String),
}

/*──────── dialing ──────────────────────*/

/// Opens a text-framed duplex connection to a URL.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Arc<dyn TransportConn>, TransportError>;
}

/*──────── per-channel connection ───────*/

/// One duplex connection carrying text frames.
///
/// `recv` hands out the inbound receiver exactly once; later calls return an
/// already-closed receiver.
#[async_trait::async_trait]
pub trait TransportConn: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), TransportError>;
    fn recv(&self) -> mpsc::Receiver<String>;
    async fn close(&self);
}
