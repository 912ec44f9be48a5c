//! Bill record operations: roots, children, merge application, settlement
//!
//! The merge engine computes field decisions outside the store; the store's
//! job is to apply them atomically. `create_root` and `apply_merge` each run
//! in a single transaction, so under the per-fingerprint lock the
//! read-modify-write of a merge is never observable half-done.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_ms, Database};
use crate::error::Result;
use crate::models::{
    BillCandidate, BillGroup, BillKind, BillRecord, FieldDecision, MergeAuditEntry, MergeState,
};

fn row_to_bill(row: &Row<'_>) -> rusqlite::Result<BillRecord> {
    let kind: String = row.get("kind")?;
    let state: String = row.get("state")?;
    let channels: String = row.get("channels")?;
    let lineage: String = row.get("lineage")?;
    Ok(BillRecord {
        id: row.get("id")?,
        parent_id: row.get("parent_id")?,
        group_id: row.get("group_id")?,
        kind: BillKind::parse(&kind).unwrap_or(BillKind::Expense),
        money_minor: row.get("money_minor")?,
        timestamp_ms: row.get("timestamp_ms")?,
        account_from: row.get("account_from")?,
        account_to: row.get("account_to")?,
        counterparty: row.get("counterparty")?,
        currency: row.get("currency")?,
        channels: serde_json::from_str(&channels).unwrap_or_default(),
        lineage: serde_json::from_str(&lineage).unwrap_or_default(),
        state: MergeState::parse(&state).unwrap_or(MergeState::Settled),
        auto_confirmed: row.get("auto_confirmed")?,
        created_at_ms: row.get("created_at_ms")?,
        updated_at_ms: row.get("updated_at_ms")?,
    })
}

const BILL_COLUMNS: &str = "id, parent_id, group_id, kind, money_minor, timestamp_ms, \
     account_from, account_to, counterparty, currency, channels, lineage, state, \
     auto_confirmed, created_at_ms, updated_at_ms";

impl Database {
    /// Create a new root record seeded from a candidate: its own parent and
    /// group (`parent_id = group_id = id`), lineage of one, state OPEN.
    pub fn create_root(&self, candidate: &BillCandidate) -> Result<BillRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_ms();

        let channels = serde_json::to_string(&vec![&candidate.channel])?;
        let lineage = serde_json::to_string(&vec![candidate.event_id])?;
        tx.execute(
            r#"
            INSERT INTO bills (parent_id, group_id, kind, money_minor, timestamp_ms,
                               account_from, account_to, counterparty, currency,
                               channels, lineage, state, auto_confirmed,
                               created_at_ms, updated_at_ms)
            VALUES (0, 0, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'open', ?, ?, ?)
            "#,
            params![
                candidate.kind.as_str(),
                candidate.money_minor,
                candidate.timestamp_ms,
                candidate.account_from,
                candidate.account_to,
                candidate.counterparty,
                candidate.currency,
                channels,
                lineage,
                candidate.auto_record,
                now,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE bills SET parent_id = ?, group_id = ? WHERE id = ?",
            params![id, id, id],
        )?;
        tx.commit()?;

        Ok(BillRecord {
            id,
            parent_id: id,
            group_id: id,
            kind: candidate.kind,
            money_minor: candidate.money_minor,
            timestamp_ms: candidate.timestamp_ms,
            account_from: candidate.account_from.clone(),
            account_to: candidate.account_to.clone(),
            counterparty: candidate.counterparty.clone(),
            currency: candidate.currency.clone(),
            channels: vec![candidate.channel.clone()],
            lineage: vec![candidate.event_id],
            state: MergeState::Open,
            auto_confirmed: candidate.auto_record,
            created_at_ms: now,
            updated_at_ms: now,
        })
    }

    /// Apply a computed merge atomically: write the root's merged fields,
    /// insert the candidate as a child of the root's group, and record the
    /// audit trail. Returns the child record.
    ///
    /// `root` must already carry the merged field values, appended lineage,
    /// and appended channel list (the merge engine computes those); money and
    /// timestamp columns of the root are deliberately not written.
    pub fn apply_merge(
        &self,
        root: &BillRecord,
        candidate: &BillCandidate,
        decisions: &[FieldDecision],
    ) -> Result<BillRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_ms();

        tx.execute(
            r#"
            UPDATE bills
            SET account_from = ?, account_to = ?, counterparty = ?,
                channels = ?, lineage = ?, updated_at_ms = ?
            WHERE id = ?
            "#,
            params![
                root.account_from,
                root.account_to,
                root.counterparty,
                serde_json::to_string(&root.channels)?,
                serde_json::to_string(&root.lineage)?,
                now,
                root.id,
            ],
        )?;

        let child_channels = serde_json::to_string(&vec![&candidate.channel])?;
        let child_lineage = serde_json::to_string(&vec![candidate.event_id])?;
        tx.execute(
            r#"
            INSERT INTO bills (parent_id, group_id, kind, money_minor, timestamp_ms,
                               account_from, account_to, counterparty, currency,
                               channels, lineage, state, auto_confirmed,
                               created_at_ms, updated_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'settled', ?, ?, ?)
            "#,
            params![
                root.id,
                root.group_id,
                candidate.kind.as_str(),
                candidate.money_minor,
                candidate.timestamp_ms,
                candidate.account_from,
                candidate.account_to,
                candidate.counterparty,
                candidate.currency,
                child_channels,
                child_lineage,
                candidate.auto_record,
                now,
                now,
            ],
        )?;
        let child_id = tx.last_insert_rowid();

        for d in decisions {
            tx.execute(
                r#"
                INSERT INTO merge_audit (bill_id, event_id, field, source_value, target_value, chosen, created_at_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    root.id,
                    candidate.event_id,
                    d.field,
                    d.source,
                    d.target,
                    d.chosen,
                    now,
                ],
            )?;
        }
        tx.commit()?;

        Ok(BillRecord {
            id: child_id,
            parent_id: root.id,
            group_id: root.group_id,
            kind: candidate.kind,
            money_minor: candidate.money_minor,
            timestamp_ms: candidate.timestamp_ms,
            account_from: candidate.account_from.clone(),
            account_to: candidate.account_to.clone(),
            counterparty: candidate.counterparty.clone(),
            currency: candidate.currency.clone(),
            channels: vec![candidate.channel.clone()],
            lineage: vec![candidate.event_id],
            state: MergeState::Settled,
            auto_confirmed: candidate.auto_record,
            created_at_ms: now,
            updated_at_ms: now,
        })
    }

    /// OPEN roots whose fingerprint matches: money equal exactly, transaction
    /// timestamp within ± `window_ms`, optionally the same kind. Ordered by
    /// id so the oldest root wins when more than one qualifies.
    pub fn find_open_roots(
        &self,
        money_minor: i64,
        timestamp_ms: i64,
        window_ms: i64,
        kind: Option<BillKind>,
    ) -> Result<Vec<BillRecord>> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT {BILL_COLUMNS} FROM bills
             WHERE state = 'open' AND parent_id = id AND money_minor = ?
               AND timestamp_ms BETWEEN ? AND ?"
        );
        if kind.is_some() {
            sql.push_str(" AND kind = ?");
        }
        sql.push_str(" ORDER BY id");

        let lo = timestamp_ms - window_ms;
        let hi = timestamp_ms + window_ms;
        let mut stmt = conn.prepare(&sql)?;
        let bills = match kind {
            Some(k) => stmt
                .query_map(params![money_minor, lo, hi, k.as_str()], row_to_bill)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map(params![money_minor, lo, hi], row_to_bill)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(bills)
    }

    pub fn get_bill(&self, id: i64) -> Result<Option<BillRecord>> {
        let conn = self.conn()?;
        let bill = conn
            .query_row(
                &format!("SELECT {BILL_COLUMNS} FROM bills WHERE id = ?"),
                params![id],
                row_to_bill,
            )
            .optional()?;
        Ok(bill)
    }

    /// All members of a group (root first, then children in merge order).
    pub fn bills_in_group(&self, group_id: i64) -> Result<Vec<BillRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {BILL_COLUMNS} FROM bills WHERE group_id = ? ORDER BY id"
        ))?;
        let bills = stmt
            .query_map(params![group_id], row_to_bill)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bills)
    }

    /// Bill clusters as `(date, member_ids)` pairs, newest roots first.
    pub fn list_groups(&self, limit: i64, offset: i64) -> Result<Vec<BillGroup>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp_ms FROM bills WHERE parent_id = id
             ORDER BY timestamp_ms DESC, id DESC LIMIT ? OFFSET ?",
        )?;
        let roots = stmt
            .query_map(params![limit, offset], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut members_stmt =
            conn.prepare("SELECT id FROM bills WHERE group_id = ? ORDER BY id")?;
        let mut groups = Vec::with_capacity(roots.len());
        for (root_id, timestamp_ms) in roots {
            let member_ids = members_stmt
                .query_map(params![root_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            let date = chrono::DateTime::from_timestamp_millis(timestamp_ms)
                .map(|dt| dt.date_naive().to_string())
                .unwrap_or_default();
            groups.push(BillGroup {
                date,
                group_id: root_id,
                member_ids,
            });
        }
        Ok(groups)
    }

    /// Transition a record to SETTLED. Returns false if it was not OPEN.
    pub fn settle_bill(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE bills SET state = 'settled' WHERE id = ? AND state = 'open'",
            params![id],
        )?;
        Ok(updated > 0)
    }

    /// Settle every OPEN root whose merge window elapsed with no further
    /// candidates. Returns the number of records settled.
    pub fn settle_expired(&self, now_ms: i64, window_ms: i64) -> Result<usize> {
        let conn = self.conn()?;
        let settled = conn.execute(
            "UPDATE bills SET state = 'settled'
             WHERE state = 'open' AND parent_id = id AND updated_at_ms < ?",
            params![now_ms - window_ms],
        )?;
        Ok(settled)
    }

    /// (total, open) record counts, for status reporting.
    pub fn bill_counts(&self) -> Result<(i64, i64)> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM bills", [], |r| r.get(0))?;
        let open: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bills WHERE state = 'open'",
            [],
            |r| r.get(0),
        )?;
        Ok((total, open))
    }

    /// Audit trail of field decisions for one bill.
    pub fn merge_audit_for(&self, bill_id: i64) -> Result<Vec<MergeAuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, bill_id, event_id, field, source_value, target_value, chosen, created_at_ms
             FROM merge_audit WHERE bill_id = ? ORDER BY id",
        )?;
        let entries = stmt
            .query_map(params![bill_id], |row| {
                Ok(MergeAuditEntry {
                    id: row.get(0)?,
                    bill_id: row.get(1)?,
                    event_id: row.get(2)?,
                    field: row.get(3)?,
                    source_value: row.get(4)?,
                    target_value: row.get(5)?,
                    chosen: row.get(6)?,
                    created_at_ms: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}
