// src/ingest/mod.rs
pub mod aggregator;
pub mod providers;
pub mod scheduler;
pub mod standardize;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use regex::Regex;

pub use aggregator::Aggregator;
pub use scheduler::{PriorityScheduler, ScheduleTier, TierJob};
pub use standardize::standardize;
pub use types::{AdapterKind, Article, FetchWindow, RawArticle, SourceAdapter};

/// Upper bound on the length of any single text field after normalization.
pub const MAX_FIELD_CHARS: usize = 20_000;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_adapter_calls_total",
            "Successful adapter fetches, by adapter."
        );
        describe_counter!(
            "ingest_adapter_errors_total",
            "Adapter call attempts that failed, by adapter and error kind."
        );
        describe_counter!(
            "ingest_adapter_failed_total",
            "Adapter calls that ended in AdapterFailed after retries."
        );
        describe_counter!(
            "ingest_articles_raw_total",
            "Raw records returned by adapters."
        );
        describe_counter!(
            "ingest_id_collisions_total",
            "Same-id articles resolved by source priority."
        );
        describe_counter!(
            "ingest_dedup_removed_total",
            "Articles removed by the near-duplicate pass."
        );
        describe_histogram!("ingest_fetch_ms", "Per-ticker aggregation time in milliseconds.");
        describe_counter!("ingest_tier_runs_total", "Tier runs started, by tier.");
        describe_counter!(
            "ingest_tier_suppressed_total",
            "Tier firings skipped because the previous run was still in flight."
        );
        describe_gauge!("ingest_tier_last_run_ts", "Unix ts when a tier last started.");
        describe_counter!("cache_hits_total", "Article cache hits.");
        describe_counter!("cache_misses_total", "Article cache misses.");
    });
}

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"))
}

fn re_ws() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

/// Normalize display text from a feed: decode entities, strip tags,
/// ASCII-fy typographic quotes, collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    out = re_tags().replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = re_ws().replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > MAX_FIELD_CHARS {
        out = out.chars().take(MAX_FIELD_CHARS).collect();
    }

    out
}

/// Lowercase + whitespace-collapse. Basis of every content hash.
pub fn fold_for_hash(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
