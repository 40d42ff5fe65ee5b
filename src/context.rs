// src/context.rs
//! Top-level owner of all pipeline state: adapters with their limiters, the
//! error ledger, cache, store and the shutdown token. Everything else borrows
//! from here; there are no process-wide singletons besides the metrics recorder.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CacheBackend, MemoryBackend, NewsCache};
use crate::config::IngestConfig;
use crate::ingest::aggregator::Aggregator;
use crate::ingest::providers::{
    http_client, AlphaVantageAdapter, FinnhubAdapter, NewsApiAdapter, RssAdapter,
};
use crate::ingest::scheduler::{ScheduleTier, TierJob};
use crate::ingest::types::{AdapterKind, SourceAdapter};
use crate::store::{ArticleStore, MemoryStore};

/// Outcome of one tier run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierReport {
    pub tickers: usize,
    pub articles: usize,
    pub inserted: usize,
    pub cached: usize,
    pub store_failures: usize,
}

pub struct IngestContext {
    config: IngestConfig,
    aggregator: Aggregator,
    cache: NewsCache,
    store: Arc<dyn ArticleStore>,
    shutdown: CancellationToken,
}

impl IngestContext {
    pub fn new(
        config: IngestConfig,
        aggregator: Aggregator,
        cache: NewsCache,
        store: Arc<dyn ArticleStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            aggregator,
            cache,
            store,
            shutdown,
        }
    }

    /// Wire adapters, cache and store from configuration and the environment.
    pub async fn from_config(config: IngestConfig, shutdown: CancellationToken) -> Result<Self> {
        let client = http_client()?;
        let aggregator = build_aggregator(&config, client, shutdown.clone(), |name| {
            std::env::var(name).ok()
        });
        let backend = cache_backend(&config).await;
        let cache = NewsCache::new(backend, config.cache.prefix.clone(), config.cache.ttl());
        let store: Arc<dyn ArticleStore> = Arc::new(MemoryStore::new());
        Ok(Self::new(config, aggregator, cache, store, shutdown))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn cache(&self) -> &NewsCache {
        &self.cache
    }

    pub fn store(&self) -> &dyn ArticleStore {
        self.store.as_ref()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Aggregate, persist, then cache. Store and cache failures are logged and
    /// counted; they never fail the run.
    pub async fn run_tier(&self, tickers: &[String]) -> TierReport {
        let results = self.aggregator.fetch_for_tickers(tickers).await;
        let today = Utc::now().date_naive();
        let mut report = TierReport {
            tickers: results.len(),
            ..TierReport::default()
        };

        // Empty results are not cached so a failed run cannot mask older data.
        let mut to_cache: HashMap<String, Vec<_>> = HashMap::new();
        for (ticker, articles) in results {
            report.articles += articles.len();
            if articles.is_empty() {
                continue;
            }
            match self.store.insert_batch(&articles).await {
                Ok(n) => report.inserted += n,
                Err(e) => {
                    report.store_failures += 1;
                    warn!(target: "ingest", ticker = %ticker, error = ?e, "store insert failed");
                }
            }
            if let Err(e) = self
                .cache
                .cache_articles_for_date(&ticker, today, &articles, None)
                .await
            {
                warn!(target: "ingest", ticker = %ticker, error = ?e, "day snapshot cache failed");
            }
            to_cache.insert(ticker, articles);
        }
        report.cached = self.cache.cache_multiple(&to_cache).await;

        info!(
            target: "ingest",
            tickers = report.tickers,
            articles = report.articles,
            inserted = report.inserted,
            cached = report.cached,
            "tier pipeline done"
        );
        report
    }
}

#[async_trait]
impl TierJob for IngestContext {
    async fn run_tier(&self, tier: &ScheduleTier) -> Result<()> {
        let report = IngestContext::run_tier(self, &tier.tickers).await;
        if report.store_failures > 0 {
            warn!(
                target: "ingest",
                tier = %tier.name,
                failures = report.store_failures,
                "tier finished with store failures"
            );
        }
        Ok(())
    }
}

/// Register every enabled adapter whose credential is available.
/// `key_lookup` resolves an environment variable name to its value.
pub fn build_aggregator(
    config: &IngestConfig,
    client: reqwest::Client,
    shutdown: CancellationToken,
    key_lookup: impl Fn(&str) -> Option<String>,
) -> Aggregator {
    let mut agg = Aggregator::new()
        .with_retry_policy(config.retry.policy())
        .with_deduplicator(config.dedup.deduplicator())
        .with_error_threshold(config.error_threshold)
        .with_lookback_days(config.lookback_days)
        .with_shutdown(shutdown);

    for kind in AdapterKind::ALL {
        let s = config.adapter(kind);
        if !s.enabled {
            info!(adapter = %kind, "adapter disabled by config");
            continue;
        }
        let key = match &s.api_key_env {
            None => None,
            Some(var) => match key_lookup(var).filter(|k| !k.trim().is_empty()) {
                Some(k) => {
                    info!(adapter = %kind, key_env = %var, key_len = k.len(), "api key present");
                    Some(k)
                }
                None => {
                    warn!(adapter = %kind, key_env = %var, "api key missing; adapter not registered");
                    continue;
                }
            },
        };
        let key = key.unwrap_or_default();
        let max = config.max_articles_per_fetch;
        let adapter: Arc<dyn SourceAdapter> = match kind {
            AdapterKind::PollRest => Arc::new(
                NewsApiAdapter::new(client.clone(), s.base_url.clone(), key).with_max_articles(max),
            ),
            AdapterKind::StructuredFeed => {
                Arc::new(AlphaVantageAdapter::new(client.clone(), s.base_url.clone(), key))
            }
            AdapterKind::TimeWindowed => Arc::new(
                FinnhubAdapter::new(client.clone(), s.base_url.clone(), key).with_max_articles(max),
            ),
            AdapterKind::Syndication => Arc::new(RssAdapter::new(client.clone(), &s.feeds)),
        };
        info!(
            adapter = %kind,
            per_minute = s.limits.calls_per_minute,
            per_day = s.limits.calls_per_day,
            "adapter registered"
        );
        agg = agg.with_adapter(adapter, s.limits);
    }
    agg
}

async fn cache_backend(config: &IngestConfig) -> Arc<dyn CacheBackend> {
    #[cfg(feature = "redis-cache")]
    {
        if let Some(url) = config.cache.redis_url.as_deref() {
            match crate::cache::RedisBackend::connect(url).await {
                Ok(b) => return Arc::new(b),
                Err(e) => warn!(error = ?e, "redis unavailable; using in-memory cache"),
            }
        }
    }
    #[cfg(not(feature = "redis-cache"))]
    {
        if config.cache.redis_url.is_some() {
            warn!("redis_url set but built without `redis-cache`; using in-memory cache");
        }
    }
    Arc::new(MemoryBackend::new())
}
