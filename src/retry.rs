//! Retry with exponential backoff, plus the per-source error ledger.
//!
//! [`retry_with_backoff`] is a plain higher-order function: it takes a policy,
//! a cancellation token and a fallible async operation, and either returns the
//! first success or collapses the last failure into
//! [`SourceError::AdapterFailed`]. Non-retryable errors short-circuit untouched.
//!
//! [`ErrorHandler`] counts failures per adapter with no decay. Once a source
//! reaches the threshold it stays disabled until [`ErrorHandler::reset_errors`]
//! is called; there is no cool-down timer. An `Auth` failure disables the
//! source for the process lifetime and is not cleared by a reset.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::SourceError;
use crate::ingest::types::AdapterKind;

/// Exponent cap so the delay computation cannot overflow.
const MAX_BACKOFF_EXP: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(MAX_BACKOFF_EXP);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or has failed
/// `max_retries + 1` times. `op` receives the 0-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    adapter: AdapterKind,
    shutdown: &CancellationToken,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt: u32 = 0;
    loop {
        let err = match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        attempt += 1;
        if attempt > policy.max_retries {
            error!(%adapter, attempts = attempt, error = %err, "max retries reached");
            return Err(SourceError::AdapterFailed {
                adapter,
                attempts: attempt,
                last: err.to_string(),
            });
        }

        let delay = policy.delay_for(attempt);
        warn!(
            %adapter,
            retry = attempt,
            max = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after backoff"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => return Err(SourceError::Cancelled),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub message: String,
    pub kind: &'static str,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceHealth {
    pub error_count: u32,
    pub last_error: Option<LastError>,
    /// Set by the first `Auth` failure; never cleared.
    pub auth_revoked: bool,
}

#[derive(Debug, Default)]
pub struct ErrorHandler {
    inner: Mutex<HashMap<AdapterKind, SourceHealth>>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_error(&self, source: AdapterKind, err: &SourceError) {
        let mut g = self.inner.lock().expect("error handler mutex poisoned");
        let h = g.entry(source).or_default();
        h.error_count = h.error_count.saturating_add(1);
        h.last_error = Some(LastError {
            message: err.to_string(),
            kind: err.kind(),
            at: Utc::now(),
        });
        if matches!(err, SourceError::Auth { .. }) && !h.auth_revoked {
            h.auth_revoked = true;
            error!(%source, "credential rejected; source disabled for this process");
        }
        warn!(%source, total = h.error_count, error = %err, "source error recorded");
    }

    /// `false` once the cumulative count reaches `threshold` or the
    /// credential was rejected.
    pub fn should_use_source(&self, source: AdapterKind, threshold: u32) -> bool {
        let g = self.inner.lock().expect("error handler mutex poisoned");
        match g.get(&source) {
            None => true,
            Some(h) if h.auth_revoked => false,
            Some(h) => h.error_count < threshold,
        }
    }

    pub fn reset_errors(&self, source: AdapterKind) {
        let mut g = self.inner.lock().expect("error handler mutex poisoned");
        if let Some(h) = g.get_mut(&source) {
            h.error_count = 0;
        }
        info!(%source, "error count reset");
    }

    pub fn reset_all(&self) {
        let mut g = self.inner.lock().expect("error handler mutex poisoned");
        for h in g.values_mut() {
            h.error_count = 0;
        }
        info!("all error counts reset");
    }

    pub fn error_count(&self, source: AdapterKind) -> u32 {
        let g = self.inner.lock().expect("error handler mutex poisoned");
        g.get(&source).map(|h| h.error_count).unwrap_or(0)
    }

    pub fn health(&self, source: AdapterKind) -> SourceHealth {
        let g = self.inner.lock().expect("error handler mutex poisoned");
        g.get(&source).cloned().unwrap_or_default()
    }

    /// Next adapter after `failed` in the fixed chain.
    pub fn get_fallback_source(&self, failed: AdapterKind) -> AdapterKind {
        let next = failed.fallback();
        info!(primary = %failed, fallback = %next, "using fallback source");
        next
    }
}

/// Name-based lookup; unknown names resolve to the terminal adapter.
pub fn fallback_for_name(failed: &str) -> AdapterKind {
    failed
        .parse::<AdapterKind>()
        .map(AdapterKind::fallback)
        .unwrap_or(AdapterKind::Syndication)
}
