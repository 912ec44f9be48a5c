//! Raw-event archive operations

use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::error::{Error, Result};
use crate::models::{Payload, RawEvent, SourceKind};

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    let kind: String = row.get("kind")?;
    let payload_text: String = row.get("payload")?;
    let structured: bool = row.get("structured")?;
    let payload = if structured {
        serde_json::from_str(&payload_text)
            .map(Payload::Structured)
            .unwrap_or(Payload::Text(payload_text))
    } else {
        Payload::Text(payload_text)
    };
    Ok(RawEvent {
        id: row.get("id")?,
        app: row.get("app")?,
        kind: SourceKind::parse(&kind).unwrap_or(SourceKind::Notification),
        payload,
        captured_at_ms: row.get("captured_at_ms")?,
        digest: row.get("digest")?,
        matched: row.get("matched")?,
        rule_name: row.get("rule_name")?,
    })
}

const EVENT_COLUMNS: &str =
    "id, app, kind, payload, structured, captured_at_ms, digest, matched, rule_name";

impl Database {
    /// Insert a capture event into the archive and return it with its id.
    pub fn insert_event(
        &self,
        app: &str,
        kind: SourceKind,
        payload: &Payload,
        captured_at_ms: i64,
    ) -> Result<RawEvent> {
        let conn = self.conn()?;
        let digest = payload.digest();
        let (text, structured) = match payload {
            Payload::Text(s) => (s.clone(), false),
            Payload::Structured(v) => (v.to_string(), true),
        };
        conn.execute(
            r#"
            INSERT INTO raw_events (app, kind, payload, structured, captured_at_ms, digest)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![app, kind.as_str(), text, structured, captured_at_ms, digest],
        )?;
        let id = conn.last_insert_rowid();
        Ok(RawEvent {
            id,
            app: app.to_string(),
            kind,
            payload: payload.clone(),
            captured_at_ms,
            digest,
            matched: false,
            rule_name: None,
        })
    }

    /// Set the archive annotations after analysis (exactly once per event).
    pub fn archive_event_result(
        &self,
        event_id: i64,
        matched: bool,
        rule_name: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE raw_events SET matched = ?, rule_name = ? WHERE id = ?",
            params![matched, rule_name, event_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("raw event {event_id}")));
        }
        Ok(())
    }

    pub fn get_event(&self, id: i64) -> Result<Option<RawEvent>> {
        let conn = self.conn()?;
        let event = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM raw_events WHERE id = ?"),
                params![id],
                row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    /// List archived events, optionally only the ones nothing matched.
    pub fn list_events(
        &self,
        unmatched_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RawEvent>> {
        let conn = self.conn()?;
        let sql = if unmatched_only {
            format!(
                "SELECT {EVENT_COLUMNS} FROM raw_events WHERE matched = 0
                 ORDER BY id DESC LIMIT ? OFFSET ?"
            )
        } else {
            format!("SELECT {EVENT_COLUMNS} FROM raw_events ORDER BY id DESC LIMIT ? OFFSET ?")
        };
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![limit, offset], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// (total, unmatched) event counts, for status reporting.
    pub fn event_counts(&self) -> Result<(i64, i64)> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM raw_events", [], |r| r.get(0))?;
        let unmatched: i64 = conn.query_row(
            "SELECT COUNT(*) FROM raw_events WHERE matched = 0",
            [],
            |r| r.get(0),
        )?;
        Ok((total, unmatched))
    }

    /// Distinct source apps seen in the archive.
    pub fn distinct_apps(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT app FROM raw_events ORDER BY app")?;
        let apps = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(apps)
    }
}
