use std::time::Duration;
use thiserror::Error;

use super::protocol::SyncConflict;
use crate::db::StoreError;

/// A failed call to the sync server.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("server requires a full resync (position {current_position})")]
    ResyncRequired { current_position: i64 },
    #[error("malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Timeouts, connection failures and 5xx responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Network(_) => true,
            TransportError::Http { status, .. } => (500..600).contains(status),
            TransportError::ResyncRequired { .. } | TransportError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Network(format!("timeout: {}", e))
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync not configured. Add server_url and api_key to config.")]
    NotConfigured,
    #[error("giving up after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },
    #[error("{} record(s) changed on the server while edited locally", .0.len())]
    Conflict(Vec<SyncConflict>),
    #[error("server requires a full resync (position {current_position})")]
    ResyncRequired { current_position: i64 },
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Builds the error for a transport failure that will not be retried
    /// further.
    pub fn from_transport(error: TransportError, attempts: u32) -> Self {
        match error {
            e @ (TransportError::Timeout(_) | TransportError::Network(_)) => {
                SyncError::Transient {
                    attempts,
                    message: e.to_string(),
                }
            }
            TransportError::Http { status, message } if (500..600).contains(&status) => {
                SyncError::Transient {
                    attempts,
                    message: format!("server returned {}: {}", status, message),
                }
            }
            TransportError::Http { status, message } => SyncError::Rejected { status, message },
            TransportError::ResyncRequired { current_position } => {
                SyncError::ResyncRequired { current_position }
            }
            TransportError::Decode(message) => SyncError::Protocol(message),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient { .. })
    }
}
