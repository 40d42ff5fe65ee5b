// src/cache.rs
//! TTL cache of per-ticker article snapshots.
//!
//! Keys:
//! - `{TICKER}:latest`: most recent snapshot
//! - `{TICKER}:{YYYY-MM-DD}`: day-scoped snapshot
//! - `{prefix}:cached_tickers`: set of tickers with a live `latest` entry
//! - `{prefix}:dated_keys`: set of live day-scoped keys
//!
//! Tracking members whose entry has expired are pruned on the next write or
//! listing of that set.
//!
//! Values are JSON article lists. An empty list is a real cached value and is
//! reported as [`CacheLookup::Hit`]; only an absent or expired key is a miss.
//! There are no cross-key transactions; last write at a key wins.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use metrics::counter;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ingest::types::Article;
use crate::store::ArticleStore;

pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);
pub const DEFAULT_PREFIX: &str = "articles";

/// Minimal key-value + set contract the cache needs from a backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    /// `true` when a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;
    /// Remaining lifetime; `None` when the key is absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
    async fn set_add(&self, key: &str, member: &str) -> Result<()>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process backend. Expiry is checked on access, and every write sweeps
/// out entries that have already expired.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, Entry>>,
    sets: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored values, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.values.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live<R>(&self, key: &str, f: impl FnOnce(&Entry, Instant) -> R) -> Option<R> {
        let now = Instant::now();
        let mut g = self.values.lock().expect("cache mutex poisoned");
        let expired = match g.get(key) {
            Some(e) if e.expires_at > now => return Some(f(e, now)),
            Some(_) => true,
            None => false,
        };
        if expired {
            g.remove(key);
        }
        None
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live(key, |e, _| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut g = self.values.lock().expect("cache mutex poisoned");
        g.retain(|_, e| e.expires_at > now);
        g.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed_value = self
            .values
            .lock()
            .expect("cache mutex poisoned")
            .remove(key)
            .is_some();
        let removed_set = self
            .sets
            .lock()
            .expect("cache mutex poisoned")
            .remove(key)
            .is_some();
        Ok(removed_value || removed_set)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key, |_, _| ()).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.live(key, |e, now| e.expires_at.saturating_duration_since(now)))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut g = self.sets.lock().expect("cache mutex poisoned");
        g.entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut g = self.sets.lock().expect("cache mutex poisoned");
        if let Some(s) = g.get_mut(key) {
            s.remove(member);
            if s.is_empty() {
                g.remove(key);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let g = self.sets.lock().expect("cache mutex poisoned");
        Ok(g.get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(feature = "redis-cache")]
pub use self::redis_backend::RedisBackend;

#[cfg(feature = "redis-cache")]
mod redis_backend {
    use super::*;
    use redis::aio::MultiplexedConnection;
    use redis::AsyncCommands;

    /// Redis backend over one multiplexed connection (cloned per command).
    #[derive(Clone)]
    pub struct RedisBackend {
        conn: MultiplexedConnection,
    }

    impl RedisBackend {
        pub async fn connect(url: &str) -> Result<Self> {
            let client = redis::Client::open(url).context("invalid redis url")?;
            let conn = client
                .get_multiplexed_tokio_connection()
                .await
                .context("failed to connect to redis")?;
            info!(target: "cache", "connected to redis");
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl CacheBackend for RedisBackend {
        fn name(&self) -> &'static str {
            "redis"
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            let mut c = self.conn.clone();
            Ok(c.get(key).await?)
        }

        async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
            let mut c = self.conn.clone();
            let secs = ttl.as_secs().max(1) as usize;
            c.set_ex::<_, _, ()>(key, value, secs).await?;
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            let mut c = self.conn.clone();
            let n: i64 = c.del(key).await?;
            Ok(n > 0)
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            let mut c = self.conn.clone();
            Ok(c.exists(key).await?)
        }

        async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
            let mut c = self.conn.clone();
            let secs: i64 = c.ttl(key).await?;
            // -2: missing, -1: no expiry
            Ok(match secs {
                s if s >= 0 => Some(Duration::from_secs(s as u64)),
                -1 => Some(Duration::MAX),
                _ => None,
            })
        }

        async fn set_add(&self, key: &str, member: &str) -> Result<()> {
            let mut c = self.conn.clone();
            c.sadd::<_, _, ()>(key, member).await?;
            Ok(())
        }

        async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
            let mut c = self.conn.clone();
            c.srem::<_, _, ()>(key, member).await?;
            Ok(())
        }

        async fn set_members(&self, key: &str) -> Result<Vec<String>> {
            let mut c = self.conn.clone();
            Ok(c.smembers(key).await?)
        }
    }
}

/// Result of a cache read. `Hit(vec![])` is distinct from `Miss`.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Vec<Article>),
    Miss,
}

impl CacheLookup {
    pub fn into_option(self) -> Option<Vec<Article>> {
        match self {
            CacheLookup::Hit(v) => Some(v),
            CacheLookup::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub total_cached_tickers: usize,
    pub cached_tickers: Vec<String>,
    pub hits: u64,
    pub misses: u64,
}

pub struct NewsCache {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn norm_ticker(t: &str) -> String {
    t.trim().to_ascii_uppercase()
}

impl NewsCache {
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>, default_ttl: Duration) -> Self {
        crate::ingest::ensure_metrics_described();
        Self {
            backend,
            prefix: prefix.into(),
            default_ttl: default_ttl.max(Duration::from_secs(1)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Memory-backed cache with default prefix and TTL.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), DEFAULT_PREFIX, DEFAULT_TTL)
    }

    pub fn latest_key(ticker: &str) -> String {
        format!("{}:latest", norm_ticker(ticker))
    }

    pub fn date_key(ticker: &str, date: NaiveDate) -> String {
        format!("{}:{}", norm_ticker(ticker), date.format("%Y-%m-%d"))
    }

    pub fn tracking_key(&self) -> String {
        format!("{}:cached_tickers", self.prefix)
    }

    fn dated_keys_key(&self) -> String {
        format!("{}:dated_keys", self.prefix)
    }

    async fn write(&self, key: &str, articles: &[Article], ttl: Option<Duration>) -> Result<()> {
        let data = serde_json::to_string(articles).context("serializing articles")?;
        self.backend
            .set_ex(key, data, ttl.unwrap_or(self.default_ttl))
            .await
            .with_context(|| format!("cache write {key}"))
    }

    async fn read(&self, key: &str) -> Result<CacheLookup> {
        let found = match self.backend.get(key).await? {
            Some(raw) => match serde_json::from_str::<Vec<Article>>(&raw) {
                Ok(list) => CacheLookup::Hit(list),
                Err(e) => {
                    warn!(target: "cache", key, error = ?e, "undecodable cache entry treated as miss");
                    CacheLookup::Miss
                }
            },
            None => CacheLookup::Miss,
        };
        if found.is_hit() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!("cache_hits_total").increment(1);
            debug!(target: "cache", key, "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("cache_misses_total").increment(1);
            debug!(target: "cache", key, "cache miss");
        }
        Ok(found)
    }

    /// Store the latest snapshot and track the ticker.
    pub async fn cache_articles(
        &self,
        ticker: &str,
        articles: &[Article],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let t = norm_ticker(ticker);
        self.write(&Self::latest_key(&t), articles, ttl).await?;
        self.backend.set_add(&self.tracking_key(), &t).await?;
        debug!(target: "cache", ticker = %t, count = articles.len(), "cached articles");
        Ok(())
    }

    pub async fn get_cached_articles(&self, ticker: &str) -> Result<CacheLookup> {
        self.read(&Self::latest_key(ticker)).await
    }

    pub async fn cache_articles_for_date(
        &self,
        ticker: &str,
        date: NaiveDate,
        articles: &[Article],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let key = Self::date_key(ticker, date);
        self.write(&key, articles, ttl).await?;
        self.prune_dated_keys().await?;
        self.backend.set_add(&self.dated_keys_key(), &key).await
    }

    /// Drop day keys whose snapshot has expired from the tracking set.
    /// Returns how many were removed.
    pub async fn prune_dated_keys(&self) -> Result<usize> {
        let set = self.dated_keys_key();
        let mut removed = 0;
        for key in self.backend.set_members(&set).await? {
            if !self.backend.exists(&key).await? {
                self.backend.set_remove(&set, &key).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(target: "cache", removed, "pruned expired day snapshots");
        }
        Ok(removed)
    }

    pub async fn get_cached_articles_for_date(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<CacheLookup> {
        self.read(&Self::date_key(ticker, date)).await
    }

    pub async fn cache_exists(&self, ticker: &str) -> Result<bool> {
        self.backend.exists(&Self::latest_key(ticker)).await
    }

    pub async fn delete_cache(&self, ticker: &str) -> Result<()> {
        let t = norm_ticker(ticker);
        self.backend.delete(&Self::latest_key(&t)).await?;
        self.backend.set_remove(&self.tracking_key(), &t).await?;
        debug!(target: "cache", ticker = %t, "deleted cache entry");
        Ok(())
    }

    /// Delete every tracked entry, then the tracking sets. Returns the number
    /// of tickers that were tracked.
    pub async fn clear_all(&self) -> Result<usize> {
        let tickers = self.backend.set_members(&self.tracking_key()).await?;
        for t in &tickers {
            self.backend.delete(&Self::latest_key(t)).await?;
        }
        for key in self.backend.set_members(&self.dated_keys_key()).await? {
            self.backend.delete(&key).await?;
        }
        self.backend.delete(&self.tracking_key()).await?;
        self.backend.delete(&self.dated_keys_key()).await?;
        info!(target: "cache", tickers = tickers.len(), "cache cleared");
        Ok(tickers.len())
    }

    pub async fn get_ttl(&self, ticker: &str) -> Result<Option<Duration>> {
        self.backend.ttl(&Self::latest_key(ticker)).await
    }

    /// Cache each ticker's list; failures are logged and skipped. Returns
    /// how many tickers were cached.
    pub async fn cache_multiple(&self, data: &HashMap<String, Vec<Article>>) -> usize {
        let mut ok = 0;
        for (ticker, articles) in data {
            match self.cache_articles(ticker, articles, None).await {
                Ok(()) => ok += 1,
                Err(e) => warn!(target: "cache", ticker = %ticker, error = ?e, "cache write failed"),
            }
        }
        debug!(target: "cache", cached = ok, total = data.len(), "cache_multiple done");
        ok
    }

    /// Tracked tickers whose `latest` entry is still live. Expired members are
    /// removed from both tracking sets.
    pub async fn cached_tickers(&self) -> Result<Vec<String>> {
        self.prune_dated_keys().await?;
        let key = self.tracking_key();
        let mut live = Vec::new();
        for t in self.backend.set_members(&key).await? {
            if self.backend.exists(&Self::latest_key(&t)).await? {
                live.push(t);
            } else {
                self.backend.set_remove(&key, &t).await?;
            }
        }
        live.sort();
        Ok(live)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let cached_tickers = self.cached_tickers().await?;
        Ok(CacheStats {
            backend: self.backend.name(),
            total_cached_tickers: cached_tickers.len(),
            cached_tickers,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        })
    }

    /// Read-through: cached list on hit; on miss query the store and cache a
    /// non-empty result. `None` when neither layer has anything.
    pub async fn get_or_load(
        &self,
        ticker: &str,
        store: &dyn ArticleStore,
        limit: usize,
    ) -> Result<Option<Vec<Article>>> {
        if let CacheLookup::Hit(list) = self.get_cached_articles(ticker).await? {
            return Ok(Some(list));
        }
        let loaded = store
            .query_by_ticker(ticker, limit)
            .await
            .context("store query on cache miss")?;
        if loaded.is_empty() {
            return Ok(None);
        }
        if let Err(e) = self.cache_articles(ticker, &loaded, None).await {
            warn!(target: "cache", ticker, error = ?e, "read-through cache fill failed");
        }
        Ok(Some(loaded))
    }
}
