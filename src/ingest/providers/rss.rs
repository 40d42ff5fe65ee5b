// src/ingest/providers/rss.rs
//! Syndication adapter: a configured list of RSS 2.0 feeds.
//!
//! Items are kept only when they are dated inside the fetch window, look
//! financial, and (for a ticker fetch) mention the ticker or company. A broken
//! feed is logged and skipped; the adapter only fails when every feed failed.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, UtcOffset};

use super::{count_raw, get_text, is_financial_text, mentions_ticker};
use crate::config::FeedConfig;
use crate::error::SourceError;
use crate::ingest::normalize_text;
use crate::ingest::types::{AdapterKind, FetchWindow, RawArticle, SourceAdapter};

const KIND: AdapterKind = AdapterKind::Syndication;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    author: Option<String>,
}

/// Falls back to chrono for zone names `time` rejects.
fn parse_rfc2822(ts: &str) -> Option<OffsetDateTime> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .ok()
                .and_then(|dt| OffsetDateTime::from_unix_timestamp(dt.timestamp()).ok())
        })
        .map(|dt| dt.to_offset(UtcOffset::UTC))
}

fn to_chrono(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(dt.unix_timestamp(), 0).single()
}

/// Some feeds ship HTML entities that are not valid XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

enum FeedSource {
    Fixture(String),
    Http(String),
}

struct Feed {
    name: String,
    source: FeedSource,
}

pub struct RssAdapter {
    feeds: Vec<Feed>,
    client: Option<reqwest::Client>,
}

impl RssAdapter {
    pub fn new(client: reqwest::Client, feeds: &[FeedConfig]) -> Self {
        Self {
            feeds: feeds
                .iter()
                .map(|f| Feed {
                    name: f.name.clone(),
                    source: FeedSource::Http(f.url.clone()),
                })
                .collect(),
            client: Some(client),
        }
    }

    pub fn from_fixture(feed_name: &str, xml: &str) -> Self {
        Self::from_fixtures(&[(feed_name, xml)])
    }

    pub fn from_fixtures(feeds: &[(&str, &str)]) -> Self {
        Self {
            feeds: feeds
                .iter()
                .map(|(name, xml)| Feed {
                    name: name.to_string(),
                    source: FeedSource::Fixture(xml.to_string()),
                })
                .collect(),
            client: None,
        }
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    async fn load(&self, feed: &Feed) -> Result<String, SourceError> {
        match &feed.source {
            FeedSource::Fixture(s) => Ok(s.clone()),
            FeedSource::Http(url) => {
                let client = self
                    .client
                    .as_ref()
                    .ok_or_else(|| SourceError::transient(KIND, "no http client"))?;
                get_text(client, KIND, url, &[]).await
            }
        }
    }
}

/// Parse one feed document into raw records tagged with the feed name.
fn parse_items(
    feed_name: &str,
    xml: &str,
    ticker: &str,
    window: &FetchWindow,
) -> Result<Vec<RawArticle>, SourceError> {
    let clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&clean).map_err(|e| SourceError::parse(KIND, e.to_string()))?;
    count_raw(KIND, rss.channel.item.len());

    let mut out = Vec::new();
    for it in rss.channel.item {
        let Some(published) = it
            .pub_date
            .as_deref()
            .and_then(parse_rfc2822)
            .and_then(|dt| to_chrono(dt).map(|c| (dt, c)))
        else {
            continue;
        };
        if !window.contains(published.1) {
            continue;
        }

        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        let summary = normalize_text(it.description.as_deref().unwrap_or_default());
        let text = format!("{title} {summary}");
        if !is_financial_text(&text) {
            continue;
        }
        if !ticker.is_empty() && !mentions_ticker(&text, ticker) {
            continue;
        }

        let mut raw = RawArticle::default()
            .with("title", title)
            .with("summary", summary)
            .with("link", it.link.unwrap_or_default())
            .with("source", feed_name);
        if let Ok(ts) = published.0.format(&Rfc3339) {
            raw = raw.with("published", ts);
        }
        if let Some(a) = it.author.filter(|a| !a.trim().is_empty()) {
            raw = raw.with("author", a);
        }
        out.push(raw);
    }
    Ok(out)
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn kind(&self) -> AdapterKind {
        KIND
    }

    async fn fetch(
        &self,
        ticker: &str,
        window: &FetchWindow,
    ) -> Result<Vec<RawArticle>, SourceError> {
        let mut out = Vec::new();
        let mut failed = 0usize;
        let mut last_err = None;

        for feed in &self.feeds {
            let parsed = match self.load(feed).await {
                Ok(body) => parse_items(&feed.name, &body, ticker, window),
                Err(e) => Err(e),
            };
            match parsed {
                Ok(items) => {
                    tracing::debug!(feed = %feed.name, kept = items.len(), "rss feed parsed");
                    out.extend(items);
                }
                Err(e) => {
                    tracing::warn!(error = ?e, feed = %feed.name, provider = "rss", "feed skipped");
                    failed += 1;
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if failed == self.feeds.len() => Err(e),
            _ => Ok(out),
        }
    }
}
