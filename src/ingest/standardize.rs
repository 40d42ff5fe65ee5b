// src/ingest/standardize.rs
//! Raw adapter record → canonical [`Article`].
//!
//! Each adapter names its fields differently; the per-kind [`FieldMap`] below
//! is the only place that knowledge lives. The article id is derived from the
//! normalized `title|url` pair only, so the same story gets the same id no
//! matter which adapter delivered it. The id is a 64-bit prefix of SHA-256:
//! collisions are negligible at a few hundred articles per run, but it is not
//! meant as a cryptographic identity.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ingest::types::{AdapterKind, Article, RawArticle};
use crate::ingest::{fold_for_hash, normalize_text};

const ID_HEX_LEN: usize = 16;
pub(crate) const NO_TITLE: &str = "No title";
const UNKNOWN: &str = "Unknown";

/// Field names to try, in order, for each canonical field.
struct FieldMap {
    title: &'static [&'static str],
    url: &'static [&'static str],
    description: &'static [&'static str],
    body: &'static [&'static str],
    source: &'static [&'static str],
    published: &'static [&'static str],
}

fn field_map(kind: AdapterKind) -> FieldMap {
    match kind {
        AdapterKind::PollRest => FieldMap {
            title: &["title"],
            url: &["url"],
            description: &["description"],
            body: &["content", "description"],
            source: &["source"],
            published: &["publishedAt", "published_at"],
        },
        AdapterKind::StructuredFeed => FieldMap {
            title: &["title"],
            url: &["url"],
            description: &["summary"],
            body: &["summary"],
            source: &["source"],
            published: &["time_published"],
        },
        AdapterKind::TimeWindowed => FieldMap {
            title: &["headline", "title"],
            url: &["url"],
            description: &["summary"],
            body: &["summary"],
            source: &["source"],
            published: &["datetime"],
        },
        AdapterKind::Syndication => FieldMap {
            title: &["title"],
            url: &["link", "url"],
            description: &["summary", "description"],
            body: &["content", "summary", "description"],
            source: &["source"],
            published: &["published", "pubDate"],
        },
    }
}

/// Deterministic article id from `title|url`.
pub fn article_id(title: &str, url: &str) -> String {
    let key = format!("{}|{}", fold_for_hash(title), fold_for_hash(url));
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(ID_HEX_LEN);
    for b in digest.iter().take(ID_HEX_LEN / 2) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

pub fn standardize(raw: &RawArticle, adapter: AdapterKind, ticker: Option<&str>) -> Article {
    standardize_at(raw, adapter, ticker, Utc::now())
}

/// Same as [`standardize`] with an explicit scrape timestamp.
pub fn standardize_at(
    raw: &RawArticle,
    adapter: AdapterKind,
    ticker: Option<&str>,
    scraped_at: DateTime<Utc>,
) -> Article {
    let map = field_map(adapter);

    let title = raw
        .str_field(map.title)
        .map(|t| normalize_text(&t))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NO_TITLE.to_string());
    let url = raw.str_field(map.url).unwrap_or_default().trim().to_string();
    let description = raw
        .str_field(map.description)
        .map(|s| normalize_text(&s))
        .unwrap_or_default();
    let body = raw
        .str_field(map.body)
        .map(|s| normalize_text(&s))
        .unwrap_or_default();

    let raw_text = [title.as_str(), description.as_str(), body.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    let published_at = map
        .published
        .iter()
        .find_map(|k| raw.get(k).and_then(parse_published));

    Article {
        id: article_id(&title, &url),
        source: source_name(raw, map.source),
        author: author(raw),
        source_adapter: adapter,
        source_priority: adapter.priority(),
        ticker: ticker.map(|t| t.trim().to_ascii_uppercase()),
        sentiment_score: raw.get("overall_sentiment_score").and_then(number),
        sentiment_label: raw.str_field(&["overall_sentiment_label"]),
        image: raw.str_field(&["image"]),
        category: raw.str_field(&["category"]),
        title,
        description,
        body,
        url,
        published_at,
        raw_text,
        scraped_at,
    }
}

/// NewsAPI nests the outlet as `{"source": {"name": ..}}`; everyone else
/// uses a plain string.
fn source_name(raw: &RawArticle, keys: &[&str]) -> String {
    for k in keys {
        match raw.get(k) {
            Some(Value::String(s)) if !s.trim().is_empty() => return s.trim().to_string(),
            Some(Value::Object(o)) => {
                if let Some(Value::String(s)) = o.get("name") {
                    if !s.trim().is_empty() {
                        return s.trim().to_string();
                    }
                }
            }
            _ => {}
        }
    }
    UNKNOWN.to_string()
}

fn author(raw: &RawArticle) -> String {
    if let Some(a) = raw.str_field(&["author"]) {
        return a.trim().to_string();
    }
    if let Some(Value::Array(list)) = raw.get("authors") {
        if let Some(Value::String(first)) = list.first() {
            if !first.trim().is_empty() {
                return first.trim().to_string();
            }
        }
    }
    UNKNOWN.to_string()
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts RFC 3339, RFC 2822, Alpha Vantage's `YYYYMMDDTHHMMSS`, and unix
/// seconds (number or numeric string). Zero/negative timestamps are absent.
pub(crate) fn parse_published(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .filter(|&ts| ts > 0)
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for fmt in ["%Y%m%dT%H%M%S", "%Y%m%dT%H%M", "%Y-%m-%dT%H:%M:%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(naive.and_utc());
                }
            }
            s.parse::<i64>()
                .ok()
                .filter(|&ts| ts > 0)
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> RawArticle {
        RawArticle::from_value(v).unwrap()
    }

    #[test]
    fn same_title_and_url_same_id_across_adapters() {
        let rest = raw(json!({"title": "Apple Q1 Earnings Beat", "url": "https://x.com/a"}));
        let finn = raw(json!({"headline": "Apple Q1 Earnings Beat", "url": "https://x.com/a"}));
        let rss = raw(json!({"title": "Apple  Q1 earnings beat", "link": "https://x.com/a"}));

        let a = standardize(&rest, AdapterKind::PollRest, Some("AAPL"));
        let b = standardize(&finn, AdapterKind::TimeWindowed, Some("AAPL"));
        let c = standardize(&rss, AdapterKind::Syndication, None);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, c.id);
        assert_eq!(a.id.len(), 16);
    }

    #[test]
    fn newsapi_fields_and_nested_source() {
        let r = raw(json!({
            "title": "Tesla shares jump",
            "description": "Deliveries <b>beat</b> estimates",
            "content": "Full story here",
            "source": {"id": null, "name": "Reuters"},
            "author": "Jane Doe",
            "url": "https://reuters.com/t",
            "publishedAt": "2025-01-15T14:30:00Z"
        }));
        let a = standardize(&r, AdapterKind::PollRest, Some("tsla"));
        assert_eq!(a.source, "Reuters");
        assert_eq!(a.author, "Jane Doe");
        assert_eq!(a.description, "Deliveries beat estimates");
        assert_eq!(a.body, "Full story here");
        assert_eq!(a.source_priority, 3);
        assert_eq!(a.ticker.as_deref(), Some("TSLA"));
        assert_eq!(
            a.published_at,
            Some(Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap())
        );
        assert_eq!(
            a.raw_text,
            "Tesla shares jump Deliveries beat estimates Full story here"
        );
    }

    #[test]
    fn structured_feed_carries_sentiment_and_first_author() {
        let r = raw(json!({
            "title": "MSFT cloud growth",
            "summary": "Azure up 30%",
            "source": "Benzinga",
            "authors": ["A. Writer", "B. Writer"],
            "url": "https://benzinga.com/m",
            "time_published": "20250115T143000",
            "overall_sentiment_score": 0.31,
            "overall_sentiment_label": "Somewhat-Bullish"
        }));
        let a = standardize(&r, AdapterKind::StructuredFeed, Some("MSFT"));
        assert_eq!(a.author, "A. Writer");
        assert_eq!(a.sentiment_score, Some(0.31));
        assert_eq!(a.sentiment_label.as_deref(), Some("Somewhat-Bullish"));
        assert_eq!(
            a.published_at,
            Some(Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap())
        );
    }

    #[test]
    fn time_windowed_unix_datetime_and_defaults() {
        let r = raw(json!({
            "headline": "Amazon expands",
            "summary": "",
            "url": "https://cnbc.com/amzn",
            "datetime": 1_736_951_400,
            "image": "https://img",
            "category": "company"
        }));
        let a = standardize(&r, AdapterKind::TimeWindowed, Some("AMZN"));
        assert_eq!(a.author, "Unknown");
        assert_eq!(a.source, "Unknown");
        assert_eq!(a.category.as_deref(), Some("company"));
        assert!(a.published_at.is_some());
        assert_eq!(a.source_priority, 2);
    }

    #[test]
    fn missing_title_falls_back() {
        let a = standardize(&RawArticle::default(), AdapterKind::Syndication, None);
        assert_eq!(a.title, "No title");
        assert_eq!(a.url, "");
        assert_eq!(a.published_at, None);
    }
}
