// src/ingest/aggregator.rs
//! Per-ticker orchestration over every registered adapter.
//!
//! Adapters are walked in fallback-chain order. Each call goes through the
//! adapter's own rate limiter and the retry executor; a failed adapter is
//! logged and the walk moves on, so a ticker never errors out, it only comes
//! back empty. Results are standardized, same-id collisions are resolved by
//! source priority, and the near-duplicate pass runs last.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dedup::Deduplicator;
use crate::error::SourceError;
use crate::ingest::ensure_metrics_described;
use crate::ingest::standardize::standardize;
use crate::ingest::types::{AdapterKind, Article, FetchWindow, RawArticle, SourceAdapter};
use crate::rate_limit::{RateLimiter, RateLimits, RateStats};
use crate::retry::{retry_with_backoff, ErrorHandler, RetryPolicy, SourceHealth};

struct AdapterSlot {
    adapter: Arc<dyn SourceAdapter>,
    limiter: RateLimiter,
}

/// Health snapshot of one registered adapter.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterStatus {
    pub adapter: AdapterKind,
    pub priority: u8,
    pub in_use: bool,
    pub health: SourceHealth,
    pub rate: RateStats,
}

pub struct Aggregator {
    slots: BTreeMap<AdapterKind, AdapterSlot>,
    errors: ErrorHandler,
    policy: RetryPolicy,
    dedup: Deduplicator,
    error_threshold: u32,
    lookback_days: u32,
    shutdown: CancellationToken,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        ensure_metrics_described();
        Self {
            slots: BTreeMap::new(),
            errors: ErrorHandler::new(),
            policy: RetryPolicy::default(),
            dedup: Deduplicator::default(),
            error_threshold: 5,
            lookback_days: 7,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register an adapter with its own limiter. Re-registering a kind replaces it.
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>, limits: RateLimits) -> Self {
        let kind = adapter.kind();
        self.slots.insert(
            kind,
            AdapterSlot {
                adapter,
                limiter: RateLimiter::new(limits),
            },
        );
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_deduplicator(mut self, dedup: Deduplicator) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold.max(1);
        self
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days.max(1);
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn adapters(&self) -> Vec<AdapterKind> {
        self.slots.keys().copied().collect()
    }

    pub fn error_handler(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn reset_errors(&self, kind: AdapterKind) {
        self.errors.reset_errors(kind);
    }

    pub fn status(&self) -> Vec<AdapterStatus> {
        self.slots
            .iter()
            .map(|(&kind, slot)| AdapterStatus {
                adapter: kind,
                priority: kind.priority(),
                in_use: self.errors.should_use_source(kind, self.error_threshold),
                health: self.errors.health(kind),
                rate: slot.limiter.stats(),
            })
            .collect()
    }

    /// One adapter call: limiter wait + fetch inside each retry attempt.
    /// Calls are recorded on success only.
    async fn call(
        &self,
        kind: AdapterKind,
        slot: &AdapterSlot,
        ticker: &str,
        window: &FetchWindow,
    ) -> Result<Vec<RawArticle>, SourceError> {
        retry_with_backoff(&self.policy, kind, &self.shutdown, |attempt| async move {
            slot.limiter.wait_if_needed(kind, &self.shutdown).await?;
            match slot.adapter.fetch(ticker, window).await {
                Ok(raw) => {
                    slot.limiter.record_call();
                    Ok(raw)
                }
                Err(e) => {
                    counter!(
                        "ingest_adapter_errors_total",
                        "adapter" => kind.as_str(),
                        "kind" => e.kind()
                    )
                    .increment(1);
                    debug!(target: "ingest", adapter = %kind, attempt, error = %e, "attempt failed");
                    Err(e)
                }
            }
        })
        .await
    }

    pub async fn fetch_for_ticker(&self, ticker: &str) -> Vec<Article> {
        self.fetch_for_ticker_in(ticker, &FetchWindow::last_days(self.lookback_days))
            .await
    }

    /// Same as [`Aggregator::fetch_for_ticker`] with an explicit window.
    pub async fn fetch_for_ticker_in(&self, ticker: &str, window: &FetchWindow) -> Vec<Article> {
        let ticker = ticker.trim().to_ascii_uppercase();
        let t0 = Instant::now();
        let mut pool: Vec<Article> = Vec::new();

        let mut kind = AdapterKind::ALL[0];
        loop {
            if self.shutdown.is_cancelled() {
                info!(target: "ingest", ticker = %ticker, "shutdown requested; stopping adapter walk");
                break;
            }

            let mut failed = false;
            match self.slots.get(&kind) {
                None => {}
                Some(_) if !self.errors.should_use_source(kind, self.error_threshold) => {
                    debug!(target: "ingest", adapter = %kind, "source disabled; skipping");
                    failed = true;
                }
                Some(slot) => match self.call(kind, slot, &ticker, window).await {
                    Ok(raw) => {
                        counter!("ingest_adapter_calls_total", "adapter" => kind.as_str())
                            .increment(1);
                        debug!(target: "ingest", adapter = %kind, ticker = %ticker, raw = raw.len(), "adapter ok");
                        pool.extend(raw.iter().map(|r| standardize(r, kind, Some(&ticker))));
                    }
                    Err(SourceError::Cancelled) => break,
                    Err(e) => {
                        if matches!(e, SourceError::AdapterFailed { .. }) {
                            counter!("ingest_adapter_failed_total", "adapter" => kind.as_str())
                                .increment(1);
                        }
                        warn!(target: "ingest", adapter = %kind, ticker = %ticker, error = %e, "adapter failed; continuing");
                        self.errors.log_error(kind, &e);
                        failed = true;
                    }
                },
            }

            if kind.is_terminal() {
                break;
            }
            kind = if failed {
                self.errors.get_fallback_source(kind)
            } else {
                kind.fallback()
            };
        }

        let merged = resolve_collisions(pool);
        let before = merged.len();
        let out = self.dedup.remove_duplicates(merged);
        let removed = before - out.len();
        if removed > 0 {
            counter!("ingest_dedup_removed_total").increment(removed as u64);
        }

        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        info!(
            target: "ingest",
            ticker = %ticker,
            articles = out.len(),
            duplicates = removed,
            "ticker aggregated"
        );
        out
    }

    /// Independent per-ticker runs. A ticker with no data maps to an empty list.
    pub async fn fetch_for_tickers(&self, tickers: &[String]) -> HashMap<String, Vec<Article>> {
        let mut out = HashMap::with_capacity(tickers.len());
        for t in tickers {
            if self.shutdown.is_cancelled() {
                break;
            }
            let key = t.trim().to_ascii_uppercase();
            let articles = self.fetch_for_ticker(&key).await;
            out.insert(key, articles);
        }
        out
    }
}

/// Same-id articles collapse to the one with the higher source priority;
/// ties keep the first occurrence. The survivor keeps the first position.
pub fn resolve_collisions(articles: Vec<Article>) -> Vec<Article> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(articles.len());
    let mut out: Vec<Article> = Vec::with_capacity(articles.len());
    let mut collisions = 0u64;

    for a in articles {
        match index.get(&a.id) {
            Some(&i) => {
                collisions += 1;
                if a.source_priority > out[i].source_priority {
                    out[i] = a;
                }
            }
            None => {
                index.insert(a.id.clone(), out.len());
                out.push(a);
            }
        }
    }
    if collisions > 0 {
        counter!("ingest_id_collisions_total").increment(collisions);
    }
    out
}
