// src/ingest/types.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SourceError;

/// Identity of a source adapter. Declaration order is the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    /// Polling REST search API (NewsAPI).
    PollRest,
    /// Structured sentiment feed (Alpha Vantage).
    StructuredFeed,
    /// Time-windowed company news (Finnhub).
    TimeWindowed,
    /// RSS syndication. Terminal link of the fallback chain.
    Syndication,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 4] = [
        AdapterKind::PollRest,
        AdapterKind::StructuredFeed,
        AdapterKind::TimeWindowed,
        AdapterKind::Syndication,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AdapterKind::PollRest => "poll-rest",
            AdapterKind::StructuredFeed => "structured-feed",
            AdapterKind::TimeWindowed => "time-windowed",
            AdapterKind::Syndication => "syndication",
        }
    }

    /// Static reliability rank; higher wins same-id collisions.
    pub fn priority(self) -> u8 {
        match self {
            AdapterKind::PollRest => 3,
            AdapterKind::StructuredFeed => 2,
            AdapterKind::TimeWindowed => 2,
            AdapterKind::Syndication => 1,
        }
    }

    /// Next adapter in the fixed chain; the terminal adapter maps to itself.
    pub fn fallback(self) -> AdapterKind {
        match self {
            AdapterKind::PollRest => AdapterKind::StructuredFeed,
            AdapterKind::StructuredFeed => AdapterKind::TimeWindowed,
            AdapterKind::TimeWindowed => AdapterKind::Syndication,
            AdapterKind::Syndication => AdapterKind::Syndication,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.fallback() == self
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = anyhow::Error;

    /// Accepts the canonical names (case-insensitive) and the provider aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll-rest" | "newsapi" => Ok(AdapterKind::PollRest),
            "structured-feed" | "alphavantage" => Ok(AdapterKind::StructuredFeed),
            "time-windowed" | "finnhub" => Ok(AdapterKind::TimeWindowed),
            "syndication" | "rss" => Ok(AdapterKind::Syndication),
            other => Err(anyhow::anyhow!("unknown adapter `{other}`")),
        }
    }
}

/// Canonical article, immutable once produced by the standardizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Truncated SHA-256 of the normalized `title|url`.
    pub id: String,
    pub title: String,
    pub description: String,
    pub body: String,
    /// Human-readable outlet name, e.g. "Reuters".
    pub source: String,
    pub source_adapter: AdapterKind,
    pub source_priority: u8,
    pub url: String,
    pub author: String,
    pub published_at: Option<DateTime<Utc>>,
    pub ticker: Option<String>,
    pub raw_text: String,
    pub scraped_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Field-named record as returned by one adapter. Only that adapter's
/// standardize mapping knows which keys to read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawArticle(pub Map<String, Value>);

impl RawArticle {
    pub fn from_value(v: Value) -> Option<Self> {
        match v {
            Value::Object(m) => Some(Self(m)),
            _ => None,
        }
    }

    /// Builder used by adapters that assemble records themselves (RSS).
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// First non-empty string among `keys`.
    pub fn str_field(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| match self.0.get(*k) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        })
    }
}

/// Inclusive day range an adapter is asked to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl FetchWindow {
    /// The last `days` days ending today (UTC).
    pub fn last_days(days: u32) -> Self {
        Self::ending_at(Utc::now(), days)
    }

    pub fn ending_at(now: DateTime<Utc>, days: u32) -> Self {
        let to = now.date_naive();
        let from = to - ChronoDuration::days(i64::from(days));
        Self { from, to }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let d = ts.date_naive();
        d >= self.from && d <= self.to
    }

    /// `YYYY-MM-DD` pair as most provider APIs expect.
    pub fn as_query_dates(&self) -> (String, String) {
        (
            self.from.format("%Y-%m-%d").to_string(),
            self.to.format("%Y-%m-%d").to_string(),
        )
    }
}

/// A source-specific fetch capability.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    async fn fetch(
        &self,
        ticker: &str,
        window: &FetchWindow,
    ) -> Result<Vec<RawArticle>, SourceError>;
}
