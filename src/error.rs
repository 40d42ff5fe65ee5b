//! Error taxonomy for source adapters.
//!
//! Every adapter call ends in either a list of raw articles or one of these.
//! Only `Transient` and `Parse` are retried locally; `RateExceeded` advances the
//! fallback chain immediately and `Auth` disables the adapter for the rest of
//! the process lifetime.

use reqwest::StatusCode;
use thiserror::Error;

use crate::ingest::types::AdapterKind;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Timeout, connection failure, 5xx.
    #[error("{adapter}: transient failure: {reason}")]
    Transient { adapter: AdapterKind, reason: String },

    /// Payload could not be decoded.
    #[error("{adapter}: malformed payload: {reason}")]
    Parse { adapter: AdapterKind, reason: String },

    /// 429 from the remote side or a local refusal.
    #[error("{adapter}: rate limit exceeded")]
    RateExceeded { adapter: AdapterKind },

    /// 401/403 or a missing/invalid credential.
    #[error("{adapter}: credential rejected")]
    Auth { adapter: AdapterKind },

    /// Terminal per-adapter-per-call outcome after retries ran out.
    #[error("{adapter}: failed after {attempts} attempts (last: {last})")]
    AdapterFailed {
        adapter: AdapterKind,
        attempts: u32,
        last: String,
    },

    /// Shutdown was requested while waiting.
    #[error("cancelled by shutdown")]
    Cancelled,
}

impl SourceError {
    pub fn transient(adapter: AdapterKind, reason: impl Into<String>) -> Self {
        Self::Transient {
            adapter,
            reason: reason.into(),
        }
    }

    pub fn parse(adapter: AdapterKind, reason: impl Into<String>) -> Self {
        Self::Parse {
            adapter,
            reason: reason.into(),
        }
    }

    /// Whether the retry executor may try the same adapter again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Parse { .. })
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Parse { .. } => "parse",
            Self::RateExceeded { .. } => "rate_exceeded",
            Self::Auth { .. } => "auth",
            Self::AdapterFailed { .. } => "adapter_failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Map a transport-level reqwest failure.
    pub fn from_transport(adapter: AdapterKind, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return classify_status(adapter, status).unwrap_or_else(|| {
                Self::transient(adapter, format!("unexpected status {status}"))
            });
        }
        let reason = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "connection failed".to_string()
        } else if err.is_decode() {
            return Self::parse(adapter, err.to_string());
        } else {
            err.to_string()
        };
        Self::transient(adapter, reason)
    }
}

/// Map an HTTP status to the taxonomy. `None` means success.
pub fn classify_status(adapter: AdapterKind, status: StatusCode) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }
    let err = match status.as_u16() {
        401 | 403 => SourceError::Auth { adapter },
        429 => SourceError::RateExceeded { adapter },
        408 => SourceError::transient(adapter, "request timeout (408)"),
        s if status.is_server_error() => {
            SourceError::transient(adapter, format!("server error ({s})"))
        }
        s => SourceError::transient(adapter, format!("unexpected status ({s})")),
    };
    Some(err)
}
