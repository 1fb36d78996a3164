//! Error taxonomy for the hub (§7). Four categories surface through one
//! enum so panel-loop and supervisor callers can match on them uniformly.

use thiserror::Error;

/// Errors a `Store` implementation can raise. The in-memory store never
/// produces one; the Redis-backed store wraps the client's own error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Errors tearing down a read or a write on one peer socket. The caller
/// never distinguishes these beyond "tear the connection down" (§4.2,
/// §7b) but the variants are kept apart for logging.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("malformed frame: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from dialing an SDK upstream.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("invalid sdk url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}

/// Errors surfaced from the hub's public operations.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid_argument: {0}")]
    InvalidArgument(String),
    #[error("missing target url")]
    MissingTargetUrl,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Dial(#[from] DialError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("write to sdk failed: {0}")]
    WriteFailed(String),
}

impl From<ConnectionError> for HubError {
    fn from(err: ConnectionError) -> Self {
        HubError::WriteFailed(err.to_string())
    }
}
