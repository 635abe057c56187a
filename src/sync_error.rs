use thiserror::Error;

use crate::communication::transports::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Connection closed or unreachable. Terminal for the channel.
    #[error("channel error: {0}")]
    Channel(String),
    /// 404 from the store.
    #[error("record {key} not found")]
    NotFound { key: String },
    /// 409 from the store.
    #[error("conflict on record {key}")]
    Conflict { key: String },
    /// Malformed frame or value.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("token acquisition failed: {0}")]
    TokenAcquisition(String),
    /// Any other non-success code from the store.
    #[error("store error {code}: {message}")]
    Store { code: u16, message: String },

    #[error("task {id} not found in {key}")]
    TaskNotFound { id: String, key: String },
    #[error("{key} is in the past and read-only")]
    ReadOnlyDay { key: String },
    #[error("no day is active")]
    NoActiveDay,
    #[error("day offset {offset} is outside the visible window")]
    DayOutOfWindow { offset: i64 },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Channel-level failures end the session; everything else is per-operation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::Channel(_))
    }
}

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        SyncError::Channel(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Protocol(e.to_string())
    }
}
