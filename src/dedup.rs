//! Near-duplicate detection across sources.
//!
//! Pairwise checks run in a fixed, short-circuiting order:
//! 1. normalized title+body hash (exact text)
//! 2. normalized URL hash (protocol and `www.` stripped)
//! 3. title sequence similarity >= `title_threshold`
//! 4. body word-set Jaccard >= `body_threshold`
//! 5. body sequence similarity >= `body_threshold`
//!
//! The batch pass keeps a registry of canonical articles and compares every
//! incoming article against all of it, so a run is O(n²) comparisons. That is
//! fine for a few hundred articles per ticker run; larger batches need a
//! blocking/indexing step first.
//!
//! Each sequence check is a character LCS, so one body pair costs up to
//! `MAX_SEQUENCE_CHARS²` (16M) cell updates. Distinct pairs with long bodies
//! always pay it, so the batch cost grows with pairs times body length squared.

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ingest::fold_for_hash;
use crate::ingest::standardize::NO_TITLE;
use crate::ingest::types::Article;

pub const DEFAULT_TITLE_THRESHOLD: f64 = 0.90;
pub const DEFAULT_BODY_THRESHOLD: f64 = 0.85;

/// Sequence similarity only looks at this many leading characters.
const MAX_SEQUENCE_CHARS: usize = 4_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupReason {
    ExactText,
    SameUrl,
    SimilarTitles,
    Jaccard,
    Sequence,
    Distinct,
}

impl fmt::Display for DedupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DedupReason::ExactText => "exact text",
            DedupReason::SameUrl => "same URL",
            DedupReason::SimilarTitles => "similar titles",
            DedupReason::Jaccard => "similar content (Jaccard)",
            DedupReason::Sequence => "similar content (sequence)",
            DedupReason::Distinct => "different articles",
        })
    }
}

/// Outcome of one pairwise comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupDecision {
    pub is_duplicate: bool,
    /// The registry article this one duplicates, or its own id when distinct.
    pub canonical_id: String,
    pub similarity_score: f64,
    pub reason: DedupReason,
}

impl DedupDecision {
    fn distinct(own_id: &str) -> Self {
        Self {
            is_duplicate: false,
            canonical_id: own_id.to_string(),
            similarity_score: 0.0,
            reason: DedupReason::Distinct,
        }
    }

    fn duplicate(of: &str, score: f64, reason: DedupReason) -> Self {
        Self {
            is_duplicate: true,
            canonical_id: of.to_string(),
            similarity_score: score,
            reason,
        }
    }

    /// Human-readable reason with the score, e.g. `similar content (Jaccard: 0.92)`.
    pub fn describe(&self) -> String {
        match self.reason {
            DedupReason::Jaccard => format!("similar content (Jaccard: {:.2})", self.similarity_score),
            DedupReason::Sequence => {
                format!("similar content (sequence: {:.2})", self.similarity_score)
            }
            DedupReason::SimilarTitles => format!("similar titles ({:.2})", self.similarity_score),
            other => other.to_string(),
        }
    }
}

/// An article dropped by the batch pass, with the decision that dropped it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateRecord {
    pub id: String,
    pub title: String,
    pub duplicate_of: String,
    pub similarity_score: f64,
    pub reason: DedupReason,
}

/// Precomputed comparison features of one article.
#[derive(Debug, Clone)]
struct Fingerprint {
    text_hash: Option<String>,
    url_hash: Option<String>,
    title: Option<Vec<char>>,
    body: Option<Vec<char>>,
    body_words: HashSet<String>,
}

impl Fingerprint {
    fn of(a: &Article) -> Self {
        let title = (a.title != NO_TITLE && !a.title.trim().is_empty())
            .then(|| a.title.to_lowercase().chars().collect());
        let body = (!a.body.trim().is_empty()).then(|| {
            a.body
                .to_lowercase()
                .chars()
                .take(MAX_SEQUENCE_CHARS)
                .collect()
        });
        Self {
            text_hash: text_hash(&a.title, &a.body),
            url_hash: url_hash(&a.url),
            title,
            body,
            body_words: word_set(&a.body),
        }
    }
}

fn hex_digest(s: &str) -> String {
    Sha256::digest(s.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Hash of the lowercased, whitespace-collapsed `title body`.
pub fn text_hash(title: &str, body: &str) -> Option<String> {
    let folded = fold_for_hash(&format!("{title} {body}"));
    (!folded.is_empty()).then(|| hex_digest(&folded))
}

fn re_scheme() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?i)https?://(www\.)?").expect("scheme regex"))
}

fn re_punct() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("punct regex"))
}

/// Hash of the URL without protocol and `www.`, lowercased.
pub fn url_hash(url: &str) -> Option<String> {
    let stripped = re_scheme().replace_all(url, "").trim().to_lowercase();
    (!stripped.is_empty()).then(|| hex_digest(&stripped))
}

fn word_set(text: &str) -> HashSet<String> {
    re_punct()
        .replace_all(&text.to_lowercase(), "")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// |A ∩ B| / |A ∪ B| over punctuation-stripped lowercase word sets.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    jaccard_sets(&word_set(a), &word_set(b))
}

fn jaccard_sets(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// Case-insensitive `2·LCS / (|a| + |b|)` over characters.
pub fn sequence_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().take(MAX_SEQUENCE_CHARS).collect();
    let b: Vec<char> = b.to_lowercase().chars().take(MAX_SEQUENCE_CHARS).collect();
    lcs_ratio(&a, &b)
}

fn lcs_ratio(a: &[char], b: &[char]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    // Two-row DP over the shorter side.
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut prev = vec![0u32; short.len() + 1];
    let mut curr = vec![0u32; short.len() + 1];
    for &cl in long {
        for (j, &cs) in short.iter().enumerate() {
            curr[j + 1] = if cl == cs {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[short.len()] as f64;
    2.0 * lcs / (a.len() + b.len()) as f64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deduplicator {
    pub title_threshold: f64,
    pub body_threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_TITLE_THRESHOLD, DEFAULT_BODY_THRESHOLD)
    }
}

impl Deduplicator {
    pub fn new(title_threshold: f64, body_threshold: f64) -> Self {
        Self {
            title_threshold: title_threshold.clamp(0.0, 1.0),
            body_threshold: body_threshold.clamp(0.0, 1.0),
        }
    }

    /// Compare `candidate` against an already-accepted `canonical`.
    pub fn is_duplicate(&self, candidate: &Article, canonical: &Article) -> DedupDecision {
        self.compare(
            &candidate.id,
            &Fingerprint::of(candidate),
            &canonical.id,
            &Fingerprint::of(canonical),
        )
    }

    fn compare(&self, own_id: &str, a: &Fingerprint, other_id: &str, b: &Fingerprint) -> DedupDecision {
        if let (Some(x), Some(y)) = (&a.text_hash, &b.text_hash) {
            if x == y {
                return DedupDecision::duplicate(other_id, 1.0, DedupReason::ExactText);
            }
        }

        if let (Some(x), Some(y)) = (&a.url_hash, &b.url_hash) {
            if x == y {
                return DedupDecision::duplicate(other_id, 1.0, DedupReason::SameUrl);
            }
        }

        if let (Some(x), Some(y)) = (&a.title, &b.title) {
            let sim = lcs_ratio(x, y);
            if sim >= self.title_threshold {
                return DedupDecision::duplicate(other_id, sim, DedupReason::SimilarTitles);
            }
        }

        if let (Some(x), Some(y)) = (&a.body, &b.body) {
            let jac = jaccard_sets(&a.body_words, &b.body_words);
            if jac >= self.body_threshold {
                return DedupDecision::duplicate(other_id, jac, DedupReason::Jaccard);
            }
            let seq = lcs_ratio(x, y);
            if seq >= self.body_threshold {
                return DedupDecision::duplicate(other_id, seq, DedupReason::Sequence);
            }
        }

        DedupDecision::distinct(own_id)
    }

    /// One decision per input article, in input order. The first article of
    /// every duplicate group is canonical (`is_duplicate == false`).
    pub fn mark_duplicates(&self, articles: &[Article]) -> Vec<DedupDecision> {
        let prints: Vec<Fingerprint> = articles.iter().map(Fingerprint::of).collect();
        let mut registry: Vec<usize> = Vec::new();
        let mut out = Vec::with_capacity(articles.len());

        for (i, article) in articles.iter().enumerate() {
            let mut best: Option<DedupDecision> = None;
            for &r in &registry {
                let d = self.compare(&article.id, &prints[i], &articles[r].id, &prints[r]);
                if !d.is_duplicate {
                    continue;
                }
                let perfect = d.similarity_score >= 1.0;
                if best
                    .as_ref()
                    .map_or(true, |b| d.similarity_score > b.similarity_score)
                {
                    best = Some(d);
                }
                if perfect {
                    break;
                }
            }

            match best {
                Some(d) => out.push(d),
                None => {
                    registry.push(i);
                    out.push(DedupDecision::distinct(&article.id));
                }
            }
        }
        out
    }

    /// Canonical survivors in input order.
    pub fn remove_duplicates(&self, articles: Vec<Article>) -> Vec<Article> {
        self.remove_duplicates_with_report(articles).0
    }

    /// Survivors plus a record for every article that was dropped.
    pub fn remove_duplicates_with_report(
        &self,
        articles: Vec<Article>,
    ) -> (Vec<Article>, Vec<DuplicateRecord>) {
        let decisions = self.mark_duplicates(&articles);
        let mut kept = Vec::with_capacity(articles.len());
        let mut dropped = Vec::new();
        for (a, d) in articles.into_iter().zip(decisions) {
            if d.is_duplicate {
                tracing::debug!(
                    target: "ingest",
                    id = %a.id,
                    duplicate_of = %d.canonical_id,
                    reason = %d.describe(),
                    "duplicate dropped"
                );
                dropped.push(DuplicateRecord {
                    id: a.id,
                    title: a.title,
                    duplicate_of: d.canonical_id,
                    similarity_score: d.similarity_score,
                    reason: d.reason,
                });
            } else {
                kept.push(a);
            }
        }
        (kept, dropped)
    }
}
