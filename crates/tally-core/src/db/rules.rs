//! Rule storage and scoped queries
//!
//! The engine owns no rule state: every analysis loads the enabled rules for
//! its `(app, kind)` scope fresh from here.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_ms, Database};
use crate::error::{Error, Result};
use crate::models::{NewRule, Rule, RuleOrigin, SourceKind};

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<Rule> {
    let kind: String = row.get("kind")?;
    let origin: String = row.get("origin")?;
    let body: String = row.get("body")?;
    Ok(Rule {
        id: row.get("id")?,
        app: row.get("app")?,
        kind: SourceKind::parse(&kind).unwrap_or(SourceKind::Notification),
        name: row.get("name")?,
        origin: RuleOrigin::parse(&origin).unwrap_or(RuleOrigin::System),
        priority: row.get("priority")?,
        enabled: row.get("enabled")?,
        auto_record: row.get("auto_record")?,
        body: serde_json::from_str(&body).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
    })
}

const RULE_COLUMNS: &str = "id, app, kind, name, origin, priority, enabled, auto_record, body";

impl Database {
    pub fn insert_rule(&self, rule: &NewRule) -> Result<Rule> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO rules (app, kind, name, origin, priority, enabled, auto_record, body, created_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                rule.app,
                rule.kind.as_str(),
                rule.name,
                rule.origin.as_str(),
                rule.priority,
                rule.enabled,
                rule.auto_record,
                serde_json::to_string(&rule.body)?,
                now_ms(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Rule {
            id,
            app: rule.app.clone(),
            kind: rule.kind,
            name: rule.name.clone(),
            origin: rule.origin,
            priority: rule.priority,
            enabled: rule.enabled,
            auto_record: rule.auto_record,
            body: rule.body.clone(),
        })
    }

    pub fn update_rule(&self, rule: &Rule) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE rules
            SET app = ?, kind = ?, name = ?, priority = ?, enabled = ?, auto_record = ?, body = ?
            WHERE id = ?
            "#,
            params![
                rule.app,
                rule.kind.as_str(),
                rule.name,
                rule.priority,
                rule.enabled,
                rule.auto_record,
                serde_json::to_string(&rule.body)?,
                rule.id,
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("rule {}", rule.id)));
        }
        Ok(())
    }

    /// Delete a user rule. System rules cannot be deleted.
    pub fn delete_rule(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let origin: Option<String> = conn
            .query_row("SELECT origin FROM rules WHERE id = ?", params![id], |r| {
                r.get(0)
            })
            .optional()?;
        match origin.as_deref() {
            None => Err(Error::NotFound(format!("rule {id}"))),
            Some("system") => Err(Error::InvalidData(
                "system rules cannot be deleted".to_string(),
            )),
            Some(_) => {
                conn.execute("DELETE FROM rules WHERE id = ?", params![id])?;
                Ok(())
            }
        }
    }

    pub fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        let conn = self.conn()?;
        let rule = conn
            .query_row(
                &format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?"),
                params![id],
                row_to_rule,
            )
            .optional()?;
        Ok(rule)
    }

    /// Enabled rules for one `(app, kind)` scope, in storage order. The
    /// engine applies evaluation ordering on top.
    pub fn rules_for(&self, app: &str, kind: SourceKind) -> Result<Vec<Rule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE app = ? AND kind = ? AND enabled = 1 ORDER BY id"
        ))?;
        let rules = stmt
            .query_map(params![app, kind.as_str()], row_to_rule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// List rules with optional filters (the read-only query surface).
    pub fn list_rules(
        &self,
        app: Option<&str>,
        kind: Option<SourceKind>,
        origin: Option<RuleOrigin>,
    ) -> Result<Vec<Rule>> {
        let conn = self.conn()?;

        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(app) = app {
            conditions.push("app = ?");
            values.push(Box::new(app.to_string()));
        }
        if let Some(kind) = kind {
            conditions.push("kind = ?");
            values.push(Box::new(kind.as_str()));
        }
        if let Some(origin) = origin {
            conditions.push("origin = ?");
            values.push(Box::new(origin.as_str()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!("SELECT {RULE_COLUMNS} FROM rules {where_clause} ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let rules = stmt
            .query_map(param_refs.as_slice(), row_to_rule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }
}
