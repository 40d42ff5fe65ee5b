// tests/providers_fixtures.rs
//
// Every adapter in fixture mode, end to end through `standardize`.

use chrono::{TimeZone, Utc};
use market_news_ingest::ingest::providers::{
    AlphaVantageAdapter, FinnhubAdapter, NewsApiAdapter, RssAdapter,
};
use market_news_ingest::ingest::{standardize, AdapterKind, Article, FetchWindow, SourceAdapter};

const YAHOO_XML: &str = include_str!("fixtures/yahoo_rss.xml");
const NEWSAPI_JSON: &str = include_str!("fixtures/newsapi_aapl.json");
const ALPHAVANTAGE_JSON: &str = include_str!("fixtures/alphavantage_aapl.json");
const FINNHUB_JSON: &str = include_str!("fixtures/finnhub_aapl.json");

fn window() -> FetchWindow {
    FetchWindow::ending_at(Utc.with_ymd_and_hms(2025, 1, 16, 0, 0, 0).unwrap(), 7)
}

async fn fetch_std(adapter: &dyn SourceAdapter, ticker: &str) -> Vec<Article> {
    let raw = adapter.fetch(ticker, &window()).await.expect("fixture fetch");
    raw.iter()
        .map(|r| standardize(r, adapter.kind(), Some(ticker)))
        .collect()
}

#[tokio::test]
async fn rss_keeps_recent_financial_items_for_ticker() {
    let rss = RssAdapter::from_fixture("Yahoo Finance", YAHOO_XML);
    let got = fetch_std(&rss, "AAPL").await;

    let titles: Vec<&str> = got.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Apple shares climb after record iPhone quarter",
            "Apple - analysts raise price target",
        ]
    );
    let first = &got[0];
    assert_eq!(first.source, "Yahoo Finance");
    assert_eq!(first.source_adapter, AdapterKind::Syndication);
    assert_eq!(first.source_priority, 1);
    assert_eq!(first.ticker.as_deref(), Some("AAPL"));
    assert_eq!(
        first.published_at,
        Some(Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap())
    );
    assert!(first.url.ends_with("apple-shares-climb-record-quarter.html"));
}

#[tokio::test]
async fn rss_ticker_filter_uses_symbol() {
    let rss = RssAdapter::from_fixture("Yahoo Finance", YAHOO_XML);
    let got = fetch_std(&rss, "TSLA").await;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].title, "Tesla stock slides on delivery miss");
}

#[tokio::test]
async fn rss_one_broken_feed_is_skipped() {
    let rss = RssAdapter::from_fixtures(&[("Broken", "<rss><channel>"), ("Yahoo Finance", YAHOO_XML)]);
    assert_eq!(rss.feed_count(), 2);
    let raw = rss.fetch("AAPL", &window()).await.expect("one feed still works");
    assert_eq!(raw.len(), 2);

    let all_broken = RssAdapter::from_fixture("Broken", "<rss><channel>");
    assert!(all_broken.fetch("AAPL", &window()).await.is_err());
}

#[tokio::test]
async fn newsapi_filters_non_financial_and_reads_nested_source() {
    let api = NewsApiAdapter::from_fixture(NEWSAPI_JSON);
    let got = fetch_std(&api, "AAPL").await;

    assert_eq!(got.len(), 2, "lifestyle item should be filtered out");
    assert_eq!(got[0].title, "Apple reports record quarterly revenue");
    assert_eq!(got[0].source, "Reuters");
    assert_eq!(got[0].author, "Stephen Nellis");
    assert_eq!(got[0].source_priority, 3);
    assert!(got[0].body.starts_with("Apple Inc reported record revenue"));
    assert_eq!(got[1].title, "Apple Q1 Earnings Beat");
    assert_eq!(got[1].source, "CNBC");
}

#[tokio::test]
async fn newsapi_respects_max_articles() {
    let api = NewsApiAdapter::from_fixture(NEWSAPI_JSON).with_max_articles(1);
    let raw = api.fetch("AAPL", &window()).await.unwrap();
    assert_eq!(raw.len(), 1);
}

#[tokio::test]
async fn alphavantage_maps_sentiment_and_drops_out_of_window() {
    let av = AlphaVantageAdapter::from_fixture(ALPHAVANTAGE_JSON);
    let got = fetch_std(&av, "AAPL").await;

    assert_eq!(got.len(), 1);
    let a = &got[0];
    assert_eq!(a.title, "Apple Stock Gains As Services Revenue Hits New High");
    assert_eq!(a.source, "Benzinga");
    assert_eq!(a.author, "Jane Doe");
    assert_eq!(a.sentiment_score, Some(0.25));
    assert_eq!(a.sentiment_label.as_deref(), Some("Somewhat-Bullish"));
    assert_eq!(
        a.published_at,
        Some(Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap())
    );
}

#[tokio::test]
async fn finnhub_reads_headline_and_unix_time() {
    let fh = FinnhubAdapter::from_fixture(FINNHUB_JSON);
    let got = fetch_std(&fh, "aapl").await;

    assert_eq!(got.len(), 2);
    let a = &got[0];
    assert_eq!(a.title, "Apple supplier Foxconn posts higher sales");
    assert_eq!(a.source, "MarketWatch");
    assert_eq!(a.ticker.as_deref(), Some("AAPL"));
    assert_eq!(a.category.as_deref(), Some("company"));
    assert_eq!(a.image.as_deref(), Some("https://static.finnhub.io/foxconn.jpg"));
    assert_eq!(
        a.published_at,
        Some(Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap())
    );
    assert_eq!(got[1].image, None, "blank image should be absent");
}

#[tokio::test]
async fn same_story_gets_same_id_across_adapters() {
    let fh = FinnhubAdapter::from_fixture(
        r#"[{"headline":"Apple Q1 Earnings Beat","url":"https://www.cnbc.com/2025/01/15/apple-q1-earnings.html","datetime":1736951400,"source":"CNBC","summary":"x"}]"#,
    );
    let from_finnhub = fetch_std(&fh, "AAPL").await;
    let from_newsapi = fetch_std(&NewsApiAdapter::from_fixture(NEWSAPI_JSON), "AAPL").await;

    assert_eq!(from_finnhub[0].id, from_newsapi[1].id);
    assert_ne!(from_newsapi[0].id, from_newsapi[1].id);
}
