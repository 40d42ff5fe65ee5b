// src/ingest/providers/mod.rs
//! Concrete source adapters plus the helpers they share: one HTTP client
//! setup, status/JSON handling, and the financial-relevance filters.

pub mod alphavantage;
pub mod finnhub;
pub mod newsapi;
pub mod rss;

use std::time::Duration;

use metrics::counter;
use serde_json::Value;

use crate::error::{classify_status, SourceError};
use crate::ingest::types::AdapterKind;

pub use alphavantage::AlphaVantageAdapter;
pub use finnhub::FinnhubAdapter;
pub use newsapi::NewsApiAdapter;
pub use rss::RssAdapter;

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("market-news-ingest/", env!("CARGO_PKG_VERSION"));

/// Shared client for all adapters.
pub fn http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

pub const FINANCIAL_KEYWORDS: &[&str] = &[
    "stock", "shares", "market", "trading", "investor", "investment", "earnings",
    "revenue", "profit", "quarter", "financial", "price", "wall street", "nasdaq",
    "dow jones", "s&p 500", "analyst", "forecast", "valuation", "dividend",
    "shareholder", "ipo",
];

pub const FINANCIAL_DOMAINS: &[&str] = &[
    "bloomberg.com", "reuters.com", "wsj.com", "cnbc.com", "marketwatch.com",
    "forbes.com", "ft.com", "barrons.com", "seekingalpha.com", "fool.com",
    "investing.com", "benzinga.com", "thestreet.com", "finance.yahoo.com",
    "investopedia.com",
];

/// Case-insensitive keyword test over free text.
pub fn is_financial_text(text: &str) -> bool {
    let lc = text.to_lowercase();
    FINANCIAL_KEYWORDS.iter().any(|k| lc.contains(k))
}

pub fn is_financial_domain(url: &str) -> bool {
    let lc = url.to_lowercase();
    FINANCIAL_DOMAINS.iter().any(|d| lc.contains(d))
}

/// Company name used to widen searches and match feed items.
pub fn company_name(ticker: &str) -> Option<&'static str> {
    let name = match ticker.trim().to_ascii_uppercase().as_str() {
        "AAPL" => "Apple",
        "TSLA" => "Tesla",
        "GOOGL" | "GOOG" => "Alphabet Google",
        "MSFT" => "Microsoft",
        "AMZN" => "Amazon",
        "NVDA" => "NVIDIA",
        "META" => "Meta Platforms",
        "NFLX" => "Netflix",
        "AMD" => "Advanced Micro Devices",
        "INTC" => "Intel",
        "BA" => "Boeing",
        "DIS" => "Disney",
        "JPM" => "JPMorgan",
        "V" => "Visa",
        "WMT" => "Walmart",
        "ORCL" => "Oracle",
        "CRM" => "Salesforce",
        "IBM" => "IBM",
        "KO" => "Coca-Cola",
        "PEP" => "PepsiCo",
        "XOM" => "Exxon Mobil",
        "GS" => "Goldman Sachs",
        "BAC" => "Bank of America",
        "PFE" => "Pfizer",
        "NKE" => "Nike",
        _ => return None,
    };
    Some(name)
}

/// Whole-word ticker match (case-sensitive) or company name (case-insensitive).
/// Multi-word names match on their first word, e.g. "Alphabet Google" → "alphabet".
pub fn mentions_ticker(text: &str, ticker: &str) -> bool {
    let t = ticker.trim().to_ascii_uppercase();
    if t.is_empty() {
        return true;
    }
    let word_hit = text
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '.')
        .any(|w| w.trim_end_matches('.') == t || w.trim_start_matches('$') == t);
    if word_hit {
        return true;
    }
    company_name(&t)
        .and_then(|n| n.split_whitespace().next())
        .is_some_and(|first| text.to_lowercase().contains(&first.to_lowercase()))
}

/// GET and decode a JSON body, mapping HTTP and transport failures.
pub(crate) async fn get_json(
    client: &reqwest::Client,
    adapter: AdapterKind,
    url: &str,
    query: &[(&str, &str)],
) -> Result<Value, SourceError> {
    let body = get_text(client, adapter, url, query).await?;
    serde_json::from_str(&body).map_err(|e| SourceError::parse(adapter, e.to_string()))
}

pub(crate) async fn get_text(
    client: &reqwest::Client,
    adapter: AdapterKind,
    url: &str,
    query: &[(&str, &str)],
) -> Result<String, SourceError> {
    let resp = match client.get(url).query(query).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = ?e, provider = adapter.as_str(), "provider http error");
            return Err(SourceError::from_transport(adapter, &e));
        }
    };
    if let Some(err) = classify_status(adapter, resp.status()) {
        return Err(err);
    }
    resp.text()
        .await
        .map_err(|e| SourceError::from_transport(adapter, &e))
}

pub(crate) fn count_raw(adapter: AdapterKind, n: usize) {
    counter!("ingest_articles_raw_total", "adapter" => adapter.as_str()).increment(n as u64);
}
