//! Tally Core Library
//!
//! Shared functionality for the Tally convergent bill-capture pipeline:
//! - Database access and migrations (bill store, raw-event archive, rules)
//! - Raw-event deduplicator (TTL digest cache)
//! - Rule engine (pattern and script rules, priority-ordered)
//! - Pluggable analyzer fallback (Ollama, mock)
//! - Candidate normalizer (fixed-point money, epoch-millis time)
//! - Bill deduplication & merge engine with per-fingerprint locking
//! - Settings provider (merge window, TTLs, known assets)

pub mod analyzer;
pub mod db;
pub mod dedup;
pub mod error;
pub mod locks;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod rules;
pub mod settings;

/// Test utilities (canned rules and payloads for integration tests)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use analyzer::{AnalyzerBackend, AnalyzerClient, MockAnalyzer, OllamaAnalyzer};
pub use db::Database;
pub use dedup::DigestCache;
pub use error::{Error, Result};
pub use locks::KeyedLocks;
pub use merge::{
    fingerprint, select_better_account, Fingerprint, MergeConfig, MergeEngine, MergeOutcome,
};
pub use models::{
    BillCandidate, BillGroup, BillKind, BillRecord, KnownAssetSet, MergeState, NewRule, Payload,
    RawCandidate, RawEvent, Rule, RuleBody, RuleOrigin, SourceKind,
};
pub use pipeline::{AnalysisOutcome, Pipeline, Submission};
pub use settings::{PipelineConfig, Settings};
