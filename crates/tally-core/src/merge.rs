//! Bill deduplication & merge engine
//!
//! Maps a normalized candidate onto an existing open bill record or creates a
//! new root, resolving field conflicts against the known-asset set. The
//! find-or-create-or-merge step is a critical section keyed by fingerprint:
//! candidates sharing a fingerprint are strictly serialized, unrelated
//! fingerprints proceed fully in parallel, and there is no global lock.
//!
//! Fingerprint: `(money_minor, time bucket)`. Money must match exactly
//! (fixed-point equality), the bucket quantizes the transaction timestamp by
//! the merge window. The open-root lookup itself is a ± window range query,
//! so clustering does not depend on bucket alignment.

use std::time::Duration;

use tracing::{debug, info};

use crate::db::{now_ms, Database};
use crate::error::Result;
use crate::locks::KeyedLocks;
use crate::models::{
    BillCandidate, BillKind, BillRecord, FieldDecision, KnownAssetSet, MergeState,
};

/// Tunables for the merge step, snapshotted from settings per submission.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Sliding window within which candidates may share a fingerprint; also
    /// the settlement horizon counted from a root's last merge activity.
    pub window: Duration,
    /// Master switch: when off, every candidate becomes its own root.
    pub auto_group: bool,
    /// Whether bill kind participates in the fingerprint. Off by default: a
    /// transfer's debit leg and an expense notification can describe the
    /// same money movement.
    pub require_same_kind: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(180),
            auto_group: true,
            require_same_kind: false,
        }
    }
}

/// Cluster key used for the per-key critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub money_minor: i64,
    pub bucket: i64,
    pub kind: Option<BillKind>,
}

/// Compute a candidate's fingerprint under the given config.
pub fn fingerprint(candidate: &BillCandidate, config: &MergeConfig) -> Fingerprint {
    let window_ms = config.window.as_millis().max(1) as i64;
    Fingerprint {
        money_minor: candidate.money_minor,
        bucket: candidate.timestamp_ms.div_euclid(window_ms),
        kind: config.require_same_kind.then_some(candidate.kind),
    }
}

/// What `merge_or_create` did with a candidate.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// No open root shared the fingerprint; the candidate became a root.
    CreatedRoot(BillRecord),
    /// The candidate was folded into an existing open root.
    Merged {
        child: BillRecord,
        root: BillRecord,
    },
}

impl MergeOutcome {
    /// The record representing this candidate (root or child).
    pub fn bill(&self) -> &BillRecord {
        match self {
            MergeOutcome::CreatedRoot(b) => b,
            MergeOutcome::Merged { child, .. } => child,
        }
    }
}

/// Pick the better of two account/counterparty names.
///
/// A recognized asset name always displaces an unrecognized one, regardless
/// of arrival order; within the same known-ness class the existing value is
/// sticky.
pub fn select_better_account(source: &str, target: &str, known: &KnownAssetSet) -> String {
    if source.is_empty() {
        return target.to_string();
    }
    if target.is_empty() {
        return source.to_string();
    }

    let source_known = known.contains(source);
    let target_known = known.contains(target);
    let chosen = match (source_known, target_known) {
        (true, false) => source,
        (false, true) => target,
        // Both known or neither known: the existing value is sticky.
        _ => target,
    };
    debug!(
        source,
        source_known, target, target_known, chosen, "account conflict resolved"
    );
    chosen.to_string()
}

pub struct MergeEngine {
    db: Database,
    locks: KeyedLocks<Fingerprint>,
}

impl MergeEngine {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: KeyedLocks::new(),
        }
    }

    /// Find-or-create-or-merge under the fingerprint's critical section.
    ///
    /// Callers must not hold the section across slow work: the analyzer has
    /// already run by the time a candidate reaches this point.
    pub async fn merge_or_create(
        &self,
        candidate: &BillCandidate,
        known: &KnownAssetSet,
        config: &MergeConfig,
    ) -> Result<MergeOutcome> {
        if !config.auto_group {
            let root = self.db.create_root(candidate)?;
            debug!(bill_id = root.id, "auto-group off; created standalone root");
            return Ok(MergeOutcome::CreatedRoot(root));
        }

        let fp = fingerprint(candidate, config);
        let section = self.locks.acquire(&fp);
        let _guard = section.lock().await;

        let window_ms = config.window.as_millis() as i64;
        let kind_filter = config.require_same_kind.then_some(candidate.kind);
        let open_roots = self.db.find_open_roots(
            candidate.money_minor,
            candidate.timestamp_ms,
            window_ms,
            kind_filter,
        )?;

        let now = now_ms();
        let mut target = None;
        for root in open_roots {
            // Lazy settlement: a root whose window elapsed must not be
            // reopened by a late candidate that happens to share the amount.
            if now - root.updated_at_ms > window_ms {
                self.db.settle_bill(root.id)?;
                debug!(bill_id = root.id, "settled stale root during lookup");
                continue;
            }
            target = Some(root);
            break;
        }

        match target {
            None => {
                let root = self.db.create_root(candidate)?;
                info!(
                    bill_id = root.id,
                    money_minor = candidate.money_minor,
                    "created bill root"
                );
                Ok(MergeOutcome::CreatedRoot(root))
            }
            Some(root) => {
                let (merged_root, decisions) = merge_into(root, candidate, known);
                let child = self.db.apply_merge(&merged_root, candidate, &decisions)?;
                info!(
                    root_id = merged_root.id,
                    child_id = child.id,
                    event_id = candidate.event_id,
                    "merged candidate into existing root"
                );
                Ok(MergeOutcome::Merged {
                    child,
                    root: merged_root,
                })
            }
        }
    }
}

/// Fold a candidate into a root: resolve the three mergeable text fields,
/// append the channel label and lineage. Root money/timestamp are never
/// touched. Returns the updated root plus the audit-worthy field decisions
/// (one per field the candidate supplied a value for).
fn merge_into(
    mut root: BillRecord,
    candidate: &BillCandidate,
    known: &KnownAssetSet,
) -> (BillRecord, Vec<FieldDecision>) {
    let mut decisions = Vec::new();

    let fields: [(&'static str, &str, &mut String); 3] = [
        ("account_from", &candidate.account_from, &mut root.account_from),
        ("account_to", &candidate.account_to, &mut root.account_to),
        ("counterparty", &candidate.counterparty, &mut root.counterparty),
    ];
    for (name, source, target) in fields {
        if source.is_empty() {
            continue;
        }
        let chosen = select_better_account(source, target, known);
        decisions.push(FieldDecision {
            field: name,
            source: source.to_string(),
            target: target.clone(),
            chosen: chosen.clone(),
        });
        *target = chosen;
    }

    if !candidate.channel.is_empty() && !root.channels.iter().any(|c| c == &candidate.channel) {
        root.channels.push(candidate.channel.clone());
    }
    root.lineage.push(candidate.event_id);
    root.updated_at_ms = now_ms();

    debug_assert!(root.state == MergeState::Open);
    (root, decisions)
}
