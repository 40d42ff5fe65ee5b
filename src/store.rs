// src/store.rs
//! Persistent article store capability.
//!
//! The pipeline only needs three operations from storage; the engine behind
//! them is not prescribed. [`MemoryStore`] is the in-process implementation
//! used by the service binary and the tests.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::ingest::types::Article;

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Insert articles whose id is not stored yet. Returns how many were new.
    async fn insert_batch(&self, articles: &[Article]) -> Result<usize>;

    /// Newest first (by `published_at`, then `scraped_at`), at most `limit`.
    async fn query_by_ticker(&self, ticker: &str, limit: usize) -> Result<Vec<Article>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    by_id: RwLock<HashMap<String, Article>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.by_id.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.by_id.read().await.is_empty()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.by_id.read().await.contains_key(id))
    }

    async fn insert_batch(&self, articles: &[Article]) -> Result<usize> {
        let mut g = self.by_id.write().await;
        let mut inserted = 0;
        for a in articles {
            if !g.contains_key(&a.id) {
                g.insert(a.id.clone(), a.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn query_by_ticker(&self, ticker: &str, limit: usize) -> Result<Vec<Article>> {
        let ticker = ticker.trim().to_ascii_uppercase();
        let g = self.by_id.read().await;
        let mut out: Vec<Article> = g
            .values()
            .filter(|a| a.ticker.as_deref() == Some(ticker.as_str()))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| b.scraped_at.cmp(&a.scraped_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        out.truncate(limit);
        Ok(out)
    }
}
