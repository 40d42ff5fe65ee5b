// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod rate_limit;
pub mod retry;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::cache::{CacheLookup, NewsCache};
pub use crate::config::{load_config_default, IngestConfig};
pub use crate::context::IngestContext;
pub use crate::dedup::{DedupDecision, DedupReason, Deduplicator};
pub use crate::error::SourceError;
pub use crate::ingest::{AdapterKind, Aggregator, Article, PriorityScheduler};
