// src/ingest/providers/newsapi.rs
//! Poll-REST adapter over NewsAPI `/v2/everything`.

use async_trait::async_trait;
use serde_json::Value;

use super::{company_name, count_raw, get_json, is_financial_domain, is_financial_text};
use crate::error::SourceError;
use crate::ingest::types::{AdapterKind, FetchWindow, RawArticle, SourceAdapter};

const KIND: AdapterKind = AdapterKind::PollRest;
const MAX_PAGE_SIZE: usize = 100;

pub struct NewsApiAdapter {
    mode: Mode,
    max_articles: usize,
}

enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        base_url: String,
        api_key: String,
    },
}

impl NewsApiAdapter {
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
            max_articles: MAX_PAGE_SIZE,
        }
    }

    pub fn from_fixture(body: &str) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
            max_articles: MAX_PAGE_SIZE,
        }
    }

    pub fn with_max_articles(mut self, n: usize) -> Self {
        self.max_articles = n.max(1);
        self
    }

    /// `(TICKER OR Company) AND (stock OR shares OR ...)`
    pub fn search_query(ticker: &str) -> String {
        let company = company_name(ticker).unwrap_or(ticker);
        format!("({ticker} OR {company}) AND (stock OR shares OR market OR trading OR earnings)")
    }

    fn parse(&self, v: Value) -> Result<Vec<RawArticle>, SourceError> {
        if v.get("status").and_then(Value::as_str) == Some("error") {
            let code = v.get("code").and_then(Value::as_str).unwrap_or_default();
            let msg = v.get("message").and_then(Value::as_str).unwrap_or(code);
            return Err(match code {
                "apiKeyInvalid" | "apiKeyMissing" | "apiKeyDisabled" | "apiKeyExhausted" => {
                    SourceError::Auth { adapter: KIND }
                }
                "rateLimited" => SourceError::RateExceeded { adapter: KIND },
                _ => SourceError::transient(KIND, msg.to_string()),
            });
        }
        let Some(items) = v.get("articles").and_then(Value::as_array) else {
            return Err(SourceError::parse(KIND, "missing `articles` array"));
        };
        count_raw(KIND, items.len());

        let out: Vec<RawArticle> = items
            .iter()
            .cloned()
            .filter_map(RawArticle::from_value)
            .filter(is_financial_article)
            .take(self.max_articles)
            .collect();
        tracing::debug!(provider = "newsapi", raw = items.len(), kept = out.len(), "parsed");
        Ok(out)
    }
}

/// Financial domain OR financial keyword in title/description/content.
fn is_financial_article(a: &RawArticle) -> bool {
    if a.str_field(&["url"]).is_some_and(|u| is_financial_domain(&u)) {
        return true;
    }
    let text = ["title", "description", "content"]
        .iter()
        .filter_map(|k| a.str_field(&[*k]))
        .collect::<Vec<_>>()
        .join(" ");
    is_financial_text(&text)
}

#[async_trait]
impl SourceAdapter for NewsApiAdapter {
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
                let (from, to) = window.as_query_dates();
                let q = Self::search_query(ticker);
                let page = self.max_articles.min(MAX_PAGE_SIZE).to_string();
                get_json(
                    client,
                    KIND,
                    base_url,
                    &[
                        ("q", q.as_str()),
                        ("from", from.as_str()),
                        ("to", to.as_str()),
                        ("language", "en"),
                        ("sortBy", "publishedAt"),
                        ("pageSize", page.as_str()),
                        ("apiKey", api_key.as_str()),
                    ],
                )
                .await?
            }
        };
        self.parse(body)
    }
}
