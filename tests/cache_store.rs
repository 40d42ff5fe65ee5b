// tests/cache_store.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;

use market_news_ingest::cache::{CacheBackend, CacheLookup, MemoryBackend, NewsCache};
use market_news_ingest::ingest::standardize::standardize_at;
use market_news_ingest::ingest::{AdapterKind, Article, RawArticle};
use market_news_ingest::store::{ArticleStore, MemoryStore};

fn article(ticker: &str, title: &str, published: &str) -> Article {
    let raw = RawArticle::from_value(json!({
        "title": title,
        "url": format!("https://news.example.com/{}", title.replace(' ', "-")),
        "publishedAt": published,
    }))
    .unwrap();
    standardize_at(
        &raw,
        AdapterKind::PollRest,
        Some(ticker),
        Utc.with_ymd_and_hms(2025, 1, 16, 0, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn store_skips_known_ids_and_sorts_newest_first() {
    let store = MemoryStore::new();
    let older = article("AAPL", "older story", "2025-01-10T10:00:00Z");
    let newer = article("AAPL", "newer story", "2025-01-14T10:00:00Z");
    let other = article("TSLA", "tesla story", "2025-01-15T10:00:00Z");

    assert_eq!(
        store
            .insert_batch(&[older.clone(), newer.clone(), other])
            .await
            .unwrap(),
        3
    );
    assert_eq!(store.insert_batch(&[older.clone()]).await.unwrap(), 0);
    assert_eq!(store.len().await, 3);
    assert!(store.exists(&newer.id).await.unwrap());

    let got = store.query_by_ticker("aapl", 10).await.unwrap();
    let titles: Vec<&str> = got.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["newer story", "older story"]);

    assert_eq!(store.query_by_ticker("AAPL", 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn read_through_fills_cache_from_store() {
    let cache = NewsCache::in_memory();
    let store = MemoryStore::new();

    assert!(cache.get_or_load("MSFT", &store, 10).await.unwrap().is_none());

    store
        .insert_batch(&[article("MSFT", "azure grows", "2025-01-15T08:00:00Z")])
        .await
        .unwrap();
    let loaded = cache
        .get_or_load("msft", &store, 10)
        .await
        .unwrap()
        .expect("store has data");
    assert_eq!(loaded.len(), 1);
    assert!(cache.cache_exists("MSFT").await.unwrap());

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.backend, "memory");
    assert_eq!(stats.cached_tickers, vec!["MSFT".to_string()]);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 0);

    cache.get_or_load("MSFT", &store, 10).await.unwrap();
    assert_eq!(cache.stats().await.unwrap().hits, 1);
}

#[tokio::test]
async fn date_snapshots_are_separate_and_cleared() {
    let cache = NewsCache::in_memory();
    let day = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
    let list = vec![article("AAPL", "snapshot", "2025-01-15T08:00:00Z")];

    cache.cache_articles_for_date("AAPL", day, &list, None).await.unwrap();
    assert_eq!(
        cache.get_cached_articles("AAPL").await.unwrap(),
        CacheLookup::Miss
    );
    assert_eq!(
        cache.get_cached_articles_for_date("aapl", day).await.unwrap(),
        CacheLookup::Hit(list.clone())
    );

    let mut batch = HashMap::new();
    batch.insert("AAPL".to_string(), list.clone());
    batch.insert("TSLA".to_string(), vec![]);
    assert_eq!(cache.cache_multiple(&batch).await, 2);

    assert_eq!(cache.clear_all().await.unwrap(), 2);
    assert_eq!(
        cache.get_cached_articles_for_date("AAPL", day).await.unwrap(),
        CacheLookup::Miss
    );
    assert!(cache.cached_tickers().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn ttl_counts_down() {
    let cache = NewsCache::in_memory();
    cache
        .cache_articles("NVDA", &[], Some(Duration::from_secs(100)))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(40)).await;

    let ttl = cache.get_ttl("NVDA").await.unwrap().expect("live entry");
    assert_eq!(ttl, Duration::from_secs(60));

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(cache.get_ttl("NVDA").await.unwrap(), None);
    assert!(!cache.cache_exists("NVDA").await.unwrap());
}

/// Memory backend that refuses writes to one key.
struct RejectsKey {
    inner: MemoryBackend,
    bad_key: &'static str,
}

#[async_trait]
impl CacheBackend for RejectsKey {
    fn name(&self) -> &'static str {
        "rejects-key"
    }
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        if key == self.bad_key {
            bail!("write refused for {key}");
        }
        self.inner.set_ex(key, value, ttl).await
    }
    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }
    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }
    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.inner.ttl(key).await
    }
    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.inner.set_add(key, member).await
    }
    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        self.inner.set_remove(key, member).await
    }
    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.inner.set_members(key).await
    }
}

#[tokio::test]
async fn cache_multiple_counts_only_successful_tickers() {
    let cache = NewsCache::new(
        Arc::new(RejectsKey {
            inner: MemoryBackend::new(),
            bad_key: "TSLA:latest",
        }),
        "articles",
        Duration::from_secs(3_600),
    );

    let mut batch = HashMap::new();
    batch.insert(
        "AAPL".to_string(),
        vec![article("AAPL", "iphone sales", "2025-01-15T08:00:00Z")],
    );
    batch.insert("TSLA".to_string(), vec![]);
    batch.insert(
        "MSFT".to_string(),
        vec![article("MSFT", "azure deal", "2025-01-15T09:00:00Z")],
    );

    assert_eq!(cache.cache_multiple(&batch).await, 2);
    assert!(cache.get_cached_articles("AAPL").await.unwrap().is_hit());
    assert!(cache.get_cached_articles("MSFT").await.unwrap().is_hit());
    assert_eq!(
        cache.get_cached_articles("TSLA").await.unwrap(),
        CacheLookup::Miss
    );
    assert_eq!(
        cache.cached_tickers().await.unwrap(),
        vec!["AAPL".to_string(), "MSFT".to_string()]
    );
}
