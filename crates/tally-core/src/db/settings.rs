//! Settings key/value store and the known-asset set

use rusqlite::{params, OptionalExtension};

use super::{now_ms, Database};
use crate::error::Result;
use crate::models::KnownAssetSet;

impl Database {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Load the full known-asset set. Consulted per merge so edits take
    /// effect without a restart.
    pub fn known_assets(&self) -> Result<KnownAssetSet> {
        Ok(KnownAssetSet::new(self.list_known_assets()?))
    }

    pub fn list_known_assets(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM known_assets ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Add a canonical asset name. Idempotent.
    pub fn add_known_asset(&self, name: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO known_assets (name, created_at_ms) VALUES (?, ?)",
            params![name, now_ms()],
        )?;
        Ok(())
    }

    /// Remove a canonical asset name. Returns whether it existed.
    pub fn remove_known_asset(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM known_assets WHERE name = ?", params![name])?;
        Ok(removed > 0)
    }
}
