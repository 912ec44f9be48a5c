//! Ingest pipeline orchestration
//!
//! RawEvent → digest deduplicator → rule engine (→ analyzer fallback if
//! unmatched) → normalizer → merge engine → store.
//!
//! Processing runs on a spawned task so a submitting caller's cancellation
//! never abandons a half-applied merge; the submitter still awaits the
//! outcome. The analyzer is awaited with a timeout and never inside the
//! per-fingerprint critical section, so a slow analyzer cannot starve
//! unrelated merges. No fault while handling one event can abort another.

use std::sync::Arc;

use tracing::{info, warn};

use crate::analyzer::{AnalyzerBackend, AnalyzerClient};
use crate::db::Database;
use crate::dedup::DigestCache;
use crate::error::{Error, Result};
use crate::merge::{MergeEngine, MergeOutcome};
use crate::models::{BillRecord, Payload, RawCandidate, SourceKind};
use crate::normalize;
use crate::rules;
use crate::settings::Settings;

/// Bounded retry of the merge critical section on store contention.
const MERGE_ATTEMPTS: u32 = 3;
const MERGE_BACKOFF_MS: u64 = 50;

/// One raw submission from a capture source.
#[derive(Debug, Clone)]
pub struct Submission {
    pub app: String,
    pub kind: SourceKind,
    pub payload: Payload,
    /// Data replayed from the app's own records: skips duplicate suppression.
    pub from_app_data: bool,
    /// Skip the rule engine and go straight to the analyzer.
    pub force_ai: bool,
}

/// Terminal result of processing one submission.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// Byte-identical repeat within the dedup TTL; nothing was processed.
    Duplicate,
    /// No rule and no analyzer result; the event is archived for manual
    /// handling. Not an error.
    Unmatched { event_id: i64 },
    /// A candidate was extracted and merged. `parent` is the updated root
    /// when the candidate folded into an existing record.
    Matched {
        bill: BillRecord,
        parent: Option<BillRecord>,
    },
}

pub struct Pipeline {
    db: Database,
    settings: Settings,
    dedup: DigestCache,
    merge: MergeEngine,
    analyzer: Option<AnalyzerClient>,
}

impl Pipeline {
    /// Build a pipeline over a database, with an optional analyzer fallback.
    /// The digest cache is sized from the settings at construction time.
    pub fn new(db: Database, analyzer: Option<AnalyzerClient>) -> Result<Arc<Self>> {
        let settings = Settings::new(db.clone());
        let config = settings.snapshot()?;
        Ok(Arc::new(Self {
            merge: MergeEngine::new(db.clone()),
            dedup: DigestCache::new(config.raw_dedup_ttl, config.raw_dedup_capacity),
            settings,
            analyzer,
            db,
        }))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn analyzer(&self) -> Option<&AnalyzerClient> {
        self.analyzer.as_ref()
    }

    /// Submit a raw event. Hands off to a background task immediately; the
    /// returned future resolves with the outcome, but dropping it does not
    /// cancel in-flight processing.
    pub async fn submit(self: Arc<Self>, submission: Submission) -> Result<AnalysisOutcome> {
        let task = tokio::spawn(async move { self.process(submission).await });
        task.await
            .map_err(|e| Error::Processing(format!("processing task failed: {e}")))?
    }

    async fn process(&self, submission: Submission) -> Result<AnalysisOutcome> {
        let config = self.settings.snapshot()?;

        // 1) Duplicate suppression (external data only, like the capture
        //    sources that re-deliver verbatim).
        let digest = submission.payload.digest();
        if !submission.from_app_data && !self.dedup.admit(&digest) {
            info!(app = %submission.app, digest = %digest, "duplicate submission ignored");
            return Ok(AnalysisOutcome::Duplicate);
        }

        // 2) Archive the capture before analysis; lineage references it.
        let event = self.db.insert_event(
            &submission.app,
            submission.kind,
            &submission.payload,
            crate::db::now_ms(),
        )?;

        // 3) Rules first, analyzer second.
        let raw = if submission.force_ai {
            None
        } else {
            let mut rules = self.db.rules_for(&submission.app, submission.kind)?;
            rules::order(&mut rules);
            rules::evaluate(&rules, &submission.payload)
        };
        let raw = match raw {
            Some(candidate) => Some(candidate),
            None => self.analyze_fallback(&submission, config.analyzer_timeout).await,
        };

        let Some(raw) = raw else {
            self.db.archive_event_result(event.id, false, None)?;
            info!(event_id = event.id, app = %submission.app, "no extraction; archived unmatched");
            return Ok(AnalysisOutcome::Unmatched { event_id: event.id });
        };

        // 4) Normalize. An extraction with an unusable amount is a no-match,
        //    not a pipeline failure.
        let candidate = match normalize::normalize(raw, &event) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(event_id = event.id, error = %e, "candidate rejected by normalizer");
                self.db.archive_event_result(event.id, false, None)?;
                return Ok(AnalysisOutcome::Unmatched { event_id: event.id });
            }
        };

        // 5) Merge under the fingerprint's critical section, with bounded
        //    retry on store contention.
        let known = self.settings.known_assets()?;
        let merge_config = config.merge_config();
        let mut attempt = 1;
        let outcome = loop {
            match self
                .merge
                .merge_or_create(&candidate, &known, &merge_config)
                .await
            {
                Ok(outcome) => break outcome,
                Err(e) if e.is_retryable() && attempt < MERGE_ATTEMPTS => {
                    warn!(attempt, error = %e, "merge contention; retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(
                        MERGE_BACKOFF_MS * attempt as u64,
                    ))
                    .await;
                    attempt += 1;
                }
                Err(e) => {
                    // Leave the event unmatched for reprocessing rather than
                    // silently dropping it.
                    self.db.archive_event_result(event.id, false, None)?;
                    return Err(e);
                }
            }
        };

        self.db
            .archive_event_result(event.id, true, Some(&candidate.rule_name))?;

        Ok(match outcome {
            MergeOutcome::CreatedRoot(bill) => AnalysisOutcome::Matched { bill, parent: None },
            MergeOutcome::Merged { child, root } => AnalysisOutcome::Matched {
                bill: child,
                parent: Some(root),
            },
        })
    }

    /// Run the analyzer with a timeout. Faults and timeouts are "no match"
    /// (fail open), never errors.
    async fn analyze_fallback(
        &self,
        submission: &Submission,
        timeout: std::time::Duration,
    ) -> Option<RawCandidate> {
        let analyzer = self.analyzer.as_ref()?;
        let extraction = tokio::time::timeout(
            timeout,
            analyzer.extract(&submission.app, submission.kind, &submission.payload),
        )
        .await;
        match extraction {
            Ok(Ok(Some(mut raw))) => {
                if raw.rule_name.is_empty() {
                    raw.rule_name = format!("{} analyzer", analyzer.model());
                }
                Some(raw)
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!(error = %e, "analyzer fault; treating as no match");
                None
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "analyzer timed out; treating as no match");
                None
            }
        }
    }

    /// Settle open roots whose merge window elapsed. Called by the server's
    /// background sweeper; the merge engine also settles lazily on lookup.
    pub fn settle_expired(&self) -> Result<usize> {
        let config = self.settings.snapshot()?;
        self.db.settle_expired(
            crate::db::now_ms(),
            config.merge_window.as_millis() as i64,
        )
    }
}
