// src/ingest/providers/alphavantage.rs
//! Structured-feed adapter over Alpha Vantage `NEWS_SENTIMENT`.
//!
//! The API answers 200 even when throttled; the body then carries a `Note` or
//! `Information` field instead of `feed`.

use async_trait::async_trait;
use serde_json::Value;

use super::{count_raw, get_json};
use crate::error::SourceError;
use crate::ingest::types::{AdapterKind, FetchWindow, RawArticle, SourceAdapter};

const KIND: AdapterKind = AdapterKind::StructuredFeed;
const LIMIT: &str = "50";

pub struct AlphaVantageAdapter {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        base_url: String,
        api_key: String,
    },
}

impl AlphaVantageAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            mode: Mode::Http {
                client,
                base_url: base_url.into(),
                api_key: api_key.into(),
            },
        }
    }

    pub fn from_fixture(body: &str) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
        }
    }
}

fn parse_feed(v: Value, window: &FetchWindow) -> Result<Vec<RawArticle>, SourceError> {
    if let Some(note) = v.get("Note").or_else(|| v.get("Information")) {
        tracing::warn!(provider = "alphavantage", note = %note, "api limit notice");
        return Err(SourceError::RateExceeded { adapter: KIND });
    }
    if let Some(msg) = v.get("Error Message").and_then(Value::as_str) {
        return Err(SourceError::transient(KIND, msg.to_string()));
    }
    let Some(items) = v.get("feed").and_then(Value::as_array) else {
        return Err(SourceError::parse(KIND, "missing `feed` array"));
    };
    count_raw(KIND, items.len());

    // Items without a parseable timestamp are kept; the API already scopes by ticker.
    Ok(items
        .iter()
        .cloned()
        .filter_map(RawArticle::from_value)
        .filter(|r| {
            r.get("time_published")
                .and_then(crate::ingest::standardize::parse_published)
                .map_or(true, |ts| window.contains(ts))
        })
        .collect())
}

#[async_trait]
impl SourceAdapter for AlphaVantageAdapter {
    fn kind(&self) -> AdapterKind {
        KIND
    }

    async fn fetch(
        &self,
        ticker: &str,
        window: &FetchWindow,
    ) -> Result<Vec<RawArticle>, SourceError> {
        let body = match &self.mode {
            Mode::Fixture(s) => {
                serde_json::from_str(s).map_err(|e| SourceError::parse(KIND, e.to_string()))?
            }
            Mode::Http {
                client,
                base_url,
                api_key,
            } => {
                let time_from = window.from.format("%Y%m%dT0000").to_string();
                get_json(
                    client,
                    KIND,
                    base_url,
                    &[
                        ("function", "NEWS_SENTIMENT"),
                        ("tickers", ticker),
                        ("time_from", time_from.as_str()),
                        ("limit", LIMIT),
                        ("apikey", api_key.as_str()),
                    ],
                )
                .await?
            }
        };
        parse_feed(body, window)
    }
}
