#![cfg(all(
    feature = "ws_transport",
    feature = "ws_native",
    not(target_arch = "wasm32")
))]

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::communication::transports::{Connector, TransportConn, TransportError};

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

fn check_ws_url(url: &str) -> Result<&str, TransportError> {
    let s = url.trim();
    if !(s.starts_with("ws://") || s.starts_with("wss://")) {
        return Err(TransportError::Io(
            "ws url must start with ws:// or wss://".into(),
        ));
    }
    Ok(s)
}

/*──────────── Connector + Conn ─────────────*/

pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WsConn {
    writer: Arc<tokio::sync::Mutex<WsSink>>,
    rx_once: std::sync::Mutex<Option<mpsc::Receiver<String>>>,
}

#[async_trait::async_trait]
impl TransportConn for WsConn {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut w = self.writer.lock().await;
        w.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Io(format!("ws send: {e}")))
    }

    fn recv(&self) -> mpsc::Receiver<String> {
        let mut g = self.rx_once.lock().expect("poisoned");
        if let Some(rx) = g.take() {
            rx
        } else {
            let (_t, rx) = mpsc::channel(1);
            rx
        }
    }

    async fn close(&self) {
        let _ = self.writer.lock().await.send(Message::Close(None)).await;
    }
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn dial(&self, url: &str) -> Result<Arc<dyn TransportConn>, TransportError> {
        let url = check_ws_url(url)?;
        let (ws, _resp) = connect_async(url)
            .await
            .map_err(|e| TransportError::Io(format!("ws connect: {e}")))?;
        let (writer, mut reader) = ws.split();

        let (tx_text, rx_text) = mpsc::channel::<String>(1024);
        tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                let text = match msg {
                    Ok(Message::Text(s)) => s,
                    Ok(Message::Binary(b)) => match String::from_utf8(b) {
                        Ok(s) => s,
                        Err(_) => {
                            debug!("ws: dropping non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => continue,
                };
                if tx_text.send(text).await.is_err() {
                    break;
                }
            }
            debug!("ws: reader exit");
        });

        Ok(Arc::new(WsConn {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            rx_once: std::sync::Mutex::new(Some(rx_text)),
        }))
    }
}

/*──────────── Tests ─────────────*/

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn spawn_echo_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let h = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        while let Some(Ok(msg)) = ws.next().await {
                            if ws.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });
        (addr, h)
    }

    #[test]
    fn rejects_non_ws_urls() {
        assert!(check_ws_url("http://localhost").is_err());
        assert_eq!(check_ws_url(" wss://a/ws ").unwrap(), "wss://a/ws");
    }

    #[tokio::test]
    async fn websocket_roundtrip_against_echo_server() {
        let (addr, _h) = spawn_echo_server().await;
        let conn = WsConnector::new()
            .dial(&format!("ws://{addr}/ws?apiKey=k"))
            .await
            .unwrap();
        let mut rx = conn.recv();
        conn.send_text(r#"{"op":1}"#.into()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"{"op":1}"#);
    }

    #[tokio::test]
    async fn dial_failure_is_io_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = match WsConnector::new().dial(&format!("ws://{addr}/ws")).await {
            Err(e) => e,
            Ok(_) => panic!("dial should fail"),
        };
        assert!(matches!(err, TransportError::Io(_)));
    }
}
