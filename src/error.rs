//! Error taxonomy for the polling engine.
//!
//! The coordinator decides retry-vs-fatal based on whether a prior good
//! snapshot exists, so adapter errors bubble up unmodified. A host that
//! cannot be resolved for an event is deliberately *not* an error; it
//! degrades to a sentinel host instead (see the aggregator).

use thiserror::Error;

pub type ZbxResult<T> = Result<T, ZbxError>;

/// Errors surfaced by the client adapter and the refresh loop.
///
/// Cloneable so that several collapsed refresh requests can all receive
/// the outcome of the one underlying fetch.
#[derive(Debug, Clone, Error)]
pub enum ZbxError {
    /// Token rejected or expired. Never retried automatically; surfaced
    /// to the operator.
    #[error("authentication rejected by Zabbix: {0}")]
    Auth(String),

    /// Transient network/DNS/TLS/timeout failure. Retried on the next
    /// scheduled tick while the previous snapshot keeps being served.
    #[error("cannot reach Zabbix: {0}")]
    Connect(String),

    /// The server answered, but not with a usable JSON-RPC payload.
    #[error("unexpected Zabbix response: {0}")]
    Protocol(String),

    /// Missing or invalid setup field. Fails fast at initialization.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ZbxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ZbxError::Protocol(err.to_string())
        } else {
            ZbxError::Connect(err.to_string())
        }
    }
}

impl ZbxError {
    /// Whether the next scheduled tick may reasonably retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ZbxError::Connect(_) | ZbxError::Protocol(_))
    }
}
