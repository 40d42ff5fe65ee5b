// src/config.rs
//! Service configuration (TOML).
//!
//! Lookup order:
//! 1) `$INGEST_CONFIG_PATH` (must exist)
//! 2) `config/ingest.toml`
//! 3) built-in defaults
//!
//! Every section is optional; missing keys fall back to defaults and all
//! values are sanitized after parsing.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::dedup::{Deduplicator, DEFAULT_BODY_THRESHOLD, DEFAULT_TITLE_THRESHOLD};
use crate::ingest::types::AdapterKind;
use crate::rate_limit::RateLimits;
use crate::retry::RetryPolicy;

pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/ingest.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Cumulative errors after which a source is skipped until reset.
    pub error_threshold: u32,
    pub lookback_days: u32,
    pub max_articles_per_fetch: usize,
    pub retry: RetryConfig,
    pub dedup: DedupConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    /// Keyed by adapter name (`poll-rest`, `newsapi`, ...).
    pub adapters: BTreeMap<String, AdapterConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            lookback_days: 7,
            max_articles_per_fetch: 100,
            retry: RetryConfig::default(),
            dedup: DedupConfig::default(),
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            adapters: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub title_threshold: f64,
    pub body_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_threshold: DEFAULT_TITLE_THRESHOLD,
            body_threshold: DEFAULT_BODY_THRESHOLD,
        }
    }
}

impl DedupConfig {
    pub fn deduplicator(&self) -> Deduplicator {
        Deduplicator::new(self.title_threshold, self.body_threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub prefix: String,
    /// Only honored with the `redis-cache` feature.
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 86_400,
            prefix: "articles".to_string(),
            redis_url: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_secs: u64,
    /// Declaration order is priority order; the first tier fires at startup.
    pub tiers: Vec<TierConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub tickers: Vec<String>,
    pub interval_secs: u64,
}

fn tier(name: &str, tickers: &[&str], minutes: u64) -> TierConfig {
    TierConfig {
        name: name.to_string(),
        tickers: tickers.iter().map(|t| t.to_string()).collect(),
        interval_secs: minutes * 60,
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_secs: 60,
            tiers: vec![
                tier("high", &["AAPL", "TSLA", "MSFT", "GOOGL", "AMZN"], 10),
                tier("medium", &["NVDA", "META", "NFLX", "AMD", "INTC"], 20),
                tier("low", &["BA", "DIS", "JPM", "V", "WMT"], 30),
            ],
        }
    }
}

/// Per-adapter overrides. Unset fields take the adapter's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub enabled: Option<bool>,
    pub calls_per_minute: Option<u32>,
    pub calls_per_day: Option<u32>,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    /// Syndication only.
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

/// Fully resolved settings for one adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    pub kind: AdapterKind,
    pub enabled: bool,
    pub limits: RateLimits,
    pub base_url: String,
    /// Environment variable holding the API key; `None` for keyless adapters.
    pub api_key_env: Option<String>,
    pub feeds: Vec<FeedConfig>,
}

struct AdapterDefaults {
    per_minute: u32,
    per_day: u32,
    base_url: &'static str,
    key_env: Option<&'static str>,
}

fn adapter_defaults(kind: AdapterKind) -> AdapterDefaults {
    match kind {
        AdapterKind::PollRest => AdapterDefaults {
            per_minute: 10,
            per_day: 100,
            base_url: "https://newsapi.org/v2/everything",
            key_env: Some("NEWSAPI_KEY"),
        },
        AdapterKind::StructuredFeed => AdapterDefaults {
            per_minute: 5,
            per_day: 500,
            base_url: "https://www.alphavantage.co/query",
            key_env: Some("ALPHAVANTAGE_KEY"),
        },
        AdapterKind::TimeWindowed => AdapterDefaults {
            per_minute: 60,
            per_day: 1_000,
            base_url: "https://finnhub.io/api/v1/company-news",
            key_env: Some("FINNHUB_KEY"),
        },
        AdapterKind::Syndication => AdapterDefaults {
            per_minute: 30,
            per_day: 10_000,
            base_url: "",
            key_env: None,
        },
    }
}

pub fn default_feeds() -> Vec<FeedConfig> {
    [
        ("Yahoo Finance", "https://finance.yahoo.com/news/rssindex"),
        ("MarketWatch", "http://feeds.marketwatch.com/marketwatch/topstories/"),
        ("Seeking Alpha", "https://seekingalpha.com/feed.xml"),
        ("Benzinga", "https://www.benzinga.com/feed"),
        (
            "Reuters Business",
            "https://www.reutersagency.com/feed/?taxonomy=best-topics&post_type=best",
        ),
    ]
    .into_iter()
    .map(|(name, url)| FeedConfig {
        name: name.to_string(),
        url: url.to_string(),
    })
    .collect()
}

impl IngestConfig {
    /// Resolve one adapter's settings against its defaults.
    pub fn adapter(&self, kind: AdapterKind) -> AdapterSettings {
        let d = adapter_defaults(kind);
        let o = self
            .adapters
            .iter()
            .find(|(name, _)| name.parse::<AdapterKind>().ok() == Some(kind))
            .map(|(_, a)| a.clone())
            .unwrap_or_default();
        let feeds = if kind == AdapterKind::Syndication && o.feeds.is_empty() {
            default_feeds()
        } else {
            o.feeds
        };
        AdapterSettings {
            kind,
            enabled: o.enabled.unwrap_or(true),
            limits: RateLimits::new(
                o.calls_per_minute.unwrap_or(d.per_minute),
                o.calls_per_day.unwrap_or(d.per_day),
            ),
            base_url: o.base_url.unwrap_or_else(|| d.base_url.to_string()),
            api_key_env: o.api_key_env.or_else(|| d.key_env.map(str::to_string)),
            feeds,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.poll_secs)
    }

    /// Clamp and normalize values in place.
    pub fn sanitize(&mut self) {
        self.dedup.title_threshold = clamp_unit(self.dedup.title_threshold, DEFAULT_TITLE_THRESHOLD);
        self.dedup.body_threshold = clamp_unit(self.dedup.body_threshold, DEFAULT_BODY_THRESHOLD);
        self.error_threshold = self.error_threshold.max(1);
        self.lookback_days = self.lookback_days.max(1);
        self.max_articles_per_fetch = self.max_articles_per_fetch.max(1);
        self.cache.ttl_secs = self.cache.ttl_secs.max(1);
        if self.cache.prefix.trim().is_empty() {
            self.cache.prefix = CacheConfig::default().prefix;
        }
        self.scheduler.poll_secs = self.scheduler.poll_secs.max(1);

        self.adapters.retain(|name, _| match name.parse::<AdapterKind>() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unknown adapter section");
                false
            }
        });
        for a in self.adapters.values_mut() {
            a.calls_per_minute = a.calls_per_minute.map(|v| v.max(1));
            a.calls_per_day = a.calls_per_day.map(|v| v.max(1));
            a.feeds.retain(|f| !f.url.trim().is_empty());
        }

        for t in &mut self.scheduler.tiers {
            t.interval_secs = t.interval_secs.max(1);
            t.tickers = clean_tickers(std::mem::take(&mut t.tickers));
        }
        self.scheduler.tiers.retain(|t| !t.tickers.is_empty());
    }
}

fn clamp_unit(v: f64, fallback: f64) -> f64 {
    if v.is_nan() {
        fallback
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Upper-case, trim, drop empties and repeats; first occurrence keeps its place.
fn clean_tickers(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim().to_ascii_uppercase();
        if !t.is_empty() && seen.insert(t.clone()) {
            out.push(t);
        }
    }
    out
}

pub fn parse_config(s: &str) -> Result<IngestConfig> {
    let mut cfg: IngestConfig = toml::from_str(s).context("parsing ingest config toml")?;
    cfg.sanitize();
    Ok(cfg)
}

pub fn load_config_from(path: &Path) -> Result<IngestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    parse_config(&content)
}

/// Load using env var + fallbacks (see module docs).
pub fn load_config_default() -> Result<IngestConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let p = PathBuf::from(DEFAULT_CONFIG_PATH);
    if p.exists() {
        return load_config_from(&p);
    }
    Ok(IngestConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, IngestConfig::default());
        assert_eq!(cfg.retry.policy(), RetryPolicy::default());
        assert_eq!(cfg.scheduler.tiers.len(), 3);
        assert_eq!(cfg.scheduler.tiers[0].interval_secs, 600);
    }

    #[test]
    fn adapter_overrides_merge_with_defaults() {
        let cfg = parse_config(
            r#"
            [adapters.poll-rest]
            calls_per_minute = 0
            enabled = false

            [[adapters.syndication.feeds]]
            name = "Only"
            url = "https://feeds.example.com/rss"
            "#,
        )
        .unwrap();
        let rest = cfg.adapter(AdapterKind::PollRest);
        assert!(!rest.enabled);
        assert_eq!(rest.limits, RateLimits::new(1, 100));
        assert_eq!(rest.api_key_env.as_deref(), Some("NEWSAPI_KEY"));

        let rss = cfg.adapter(AdapterKind::Syndication);
        assert_eq!(rss.feeds.len(), 1);
        assert_eq!(rss.api_key_env, None);

        let av = cfg.adapter(AdapterKind::StructuredFeed);
        assert_eq!(av.limits, RateLimits::new(5, 500));
        assert!(cfg.adapter(AdapterKind::TimeWindowed).feeds.is_empty());
    }

    #[test]
    fn sanitize_clamps_and_cleans_tiers() {
        let cfg = parse_config(
            r#"
            [dedup]
            title_threshold = 1.7
            body_threshold = -0.2

            [scheduler]
            poll_secs = 0

            [[scheduler.tiers]]
            name = "hot"
            tickers = [" aapl", "AAPL", "", "tsla"]
            interval_secs = 0

            [[scheduler.tiers]]
            name = "empty"
            tickers = ["  "]
            interval_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.dedup.title_threshold, 1.0);
        assert_eq!(cfg.dedup.body_threshold, 0.0);
        assert_eq!(cfg.scheduler.poll_secs, 1);
        assert_eq!(cfg.scheduler.tiers.len(), 1);
        assert_eq!(cfg.scheduler.tiers[0].tickers, vec!["AAPL", "TSLA"]);
        assert_eq!(cfg.scheduler.tiers[0].interval_secs, 1);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);

        assert_eq!(load_config_default().unwrap(), IngestConfig::default());

        let p = tmp.path().join("custom.toml");
        fs::write(&p, "lookback_days = 3\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        assert_eq!(load_config_default().unwrap().lookback_days, 3);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
        assert!(load_config_default().is_err());
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
