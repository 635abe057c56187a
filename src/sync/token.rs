use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::{
    communication::protocol::{TokenRequest, TokenResponse},
    record_key::RecordKey,
    sync_error::SyncError,
};

/// Exchanges the API key for a short-lived token scoped to a set of keys.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self, keys: &[RecordKey]) -> Result<String, SyncError>;
}

/// Token endpoint over HTTP(S): `POST {subscribeKeys}` → `{token}`.
pub struct HttpTokenProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpTokenProvider {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    #[instrument(skip_all, fields(url = %self.url, keys = keys.len()))]
    async fn acquire(&self, keys: &[RecordKey]) -> Result<String, SyncError> {
        let body = TokenRequest {
            subscribe_keys: keys.iter().map(|k| k.to_string()).collect(),
        };
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::TokenAcquisition(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::TokenAcquisition(format!("{status}: {text}")));
        }

        let parsed = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| SyncError::TokenAcquisition(format!("bad token response: {e}")))?;
        if parsed.token.is_empty() {
            return Err(SyncError::TokenAcquisition("empty token".into()));
        }
        debug!("token: acquired");
        Ok(parsed.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    /// Minimal one-shot HTTP server answering with `status` and `body`.
    /// Returns the url and a handle yielding the raw request.
    async fn one_shot(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut req = Vec::new();
            // Read headers, then the declared body.
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                req.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&req).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let len = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if req.len() >= split + 4 + len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(reply.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
            String::from_utf8_lossy(&req).to_string()
        });
        (format!("http://{addr}/token/websocket"), handle)
    }

    fn keys() -> Vec<RecordKey> {
        vec![
            RecordKey::parse("todos-20250101").unwrap(),
            RecordKey::parse("todos-20250102").unwrap(),
        ]
    }

    #[tokio::test]
    async fn posts_keys_with_api_key_header() {
        let (url, server) = one_shot("200 OK", r#"{"token":"tok-1"}"#).await;
        let p = HttpTokenProvider::new(url, "secret", Duration::from_secs(5)).unwrap();
        assert_eq!(p.acquire(&keys()).await.unwrap(), "tok-1");

        let req = server.await.unwrap();
        assert!(req.starts_with("POST /token/websocket"));
        assert!(req.to_ascii_lowercase().contains("x-api-key: secret"));
        assert!(req.contains(r#"{"subscribeKeys":["todos-20250101","todos-20250102"]}"#));
    }

    #[tokio::test]
    async fn non_success_status_fails() {
        let (url, _server) = one_shot("403 Forbidden", r#"{"error":"nope"}"#).await;
        let p = HttpTokenProvider::new(url, "secret", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            p.acquire(&keys()).await,
            Err(SyncError::TokenAcquisition(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails() {
        let p = HttpTokenProvider::new(
            "http://127.0.0.1:9/token/websocket",
            "secret",
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(matches!(
            p.acquire(&keys()).await,
            Err(SyncError::TokenAcquisition(_))
        ));
    }
}
