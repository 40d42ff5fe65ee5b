// src/ingest/providers/finnhub.rs
//! Time-windowed adapter over Finnhub `company-news`.

use async_trait::async_trait;
use serde_json::Value;

use super::{count_raw, get_json};
use crate::error::SourceError;
use crate::ingest::types::{AdapterKind, FetchWindow, RawArticle, SourceAdapter};

const KIND: AdapterKind = AdapterKind::TimeWindowed;

pub struct FinnhubAdapter {
    mode: Mode,
    max_articles: usize,
}

enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        base_url: String,
        token: String,
    },
}

impl FinnhubAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            mode: Mode::Http {
                client,
                base_url: base_url.into(),
                token: token.into(),
            },
            max_articles: 100,
        }
    }

    pub fn from_fixture(body: &str) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
            max_articles: 100,
        }
    }

    pub fn with_max_articles(mut self, n: usize) -> Self {
        self.max_articles = n.max(1);
        self
    }

    fn parse(&self, v: Value) -> Result<Vec<RawArticle>, SourceError> {
        let Value::Array(items) = v else {
            // Finnhub reports errors as `{"error": "..."}` with a 200.
            let reason = v
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("expected a JSON array")
                .to_string();
            return Err(SourceError::parse(KIND, reason));
        };
        count_raw(KIND, items.len());
        Ok(items
            .into_iter()
            .filter_map(RawArticle::from_value)
            .take(self.max_articles)
            .collect())
    }
}

#[async_trait]
impl SourceAdapter for FinnhubAdapter {
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
                token,
            } => {
                let (from, to) = window.as_query_dates();
                get_json(
                    client,
                    KIND,
                    base_url,
                    &[
                        ("symbol", ticker),
                        ("from", from.as_str()),
                        ("to", to.as_str()),
                        ("token", token.as_str()),
                    ],
                )
                .await?
            }
        };
        self.parse(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_array_body_is_parse_error() {
        let a = FinnhubAdapter::from_fixture(r#"{"error":"Invalid API key."}"#);
        let err = a.fetch("AAPL", &FetchWindow::last_days(7)).await.unwrap_err();
        assert_eq!(err, SourceError::parse(KIND, "Invalid API key."));
    }

    #[tokio::test]
    async fn array_items_become_raw_records() {
        let a = FinnhubAdapter::from_fixture(
            r#"[{"headline":"A","url":"u1","datetime":1736951400},"junk",{"headline":"B","url":"u2"}]"#,
        )
        .with_max_articles(5);
        let got = a.fetch("AAPL", &FetchWindow::last_days(7)).await.unwrap();
        assert_eq!(got.len(), 2);
    }
}
