use std::ops::RangeInclusive;
use std::time::Duration;

use crate::{
    communication::correlator::DEFAULT_SENT_CAPACITY, sync::debounce::DEFAULT_DEBOUNCE_WINDOW,
    sync_error::SyncError,
};

pub const DEFAULT_ENDPOINT: &str = "localhost:8080";
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Yesterday through four days ahead.
pub const DEFAULT_DAY_OFFSETS: RangeInclusive<i64> = -1..=4;

/// Connection and tuning settings for one client session.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// `host[:port]` of the store, without scheme.
    pub endpoint: String,
    pub api_key: String,
    /// Force TLS on or off. `None` picks plain only for localhost.
    pub secure: Option<bool>,
    pub debounce_window: Duration,
    pub sent_id_capacity: usize,
    pub day_offsets: RangeInclusive<i64>,
    pub token_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            secure: None,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            sent_id_capacity: DEFAULT_SENT_CAPACITY,
            day_offsets: DEFAULT_DAY_OFFSETS,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn is_secure(&self) -> bool {
        self.secure.unwrap_or_else(|| !is_local(&self.endpoint))
    }

    fn ws_scheme(&self) -> &'static str {
        if self.is_secure() {
            "wss"
        } else {
            "ws"
        }
    }

    fn http_scheme(&self) -> &'static str {
        if self.is_secure() {
            "https"
        } else {
            "http"
        }
    }

    pub fn command_url(&self) -> String {
        format!(
            "{}://{}/ws?apiKey={}",
            self.ws_scheme(),
            self.endpoint,
            self.api_key
        )
    }

    pub fn token_url(&self) -> String {
        format!("{}://{}/token/websocket", self.http_scheme(), self.endpoint)
    }

    pub fn notification_url(&self, token: &str) -> String {
        format!("{}://{}/ws?token={}", self.ws_scheme(), self.endpoint, token)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.endpoint.trim().is_empty() {
            return Err(SyncError::Config("endpoint is empty".into()));
        }
        if self.endpoint.contains("://") {
            return Err(SyncError::Config(format!(
                "endpoint {:?} must not carry a scheme",
                self.endpoint
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(SyncError::Config("api key is empty".into()));
        }
        if !self.day_offsets.contains(&0) {
            return Err(SyncError::Config(format!(
                "day offsets {:?} must include today",
                self.day_offsets
            )));
        }
        if self.sent_id_capacity == 0 {
            return Err(SyncError::Config("sent id capacity must be positive".into()));
        }
        Ok(())
    }
}

fn is_local(endpoint: &str) -> bool {
    let host = endpoint.split(':').next().unwrap_or(endpoint);
    matches!(host, "localhost" | "127.0.0.1")
}
