//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `events` - Raw-event archive operations
//! - `rules` - Rule storage and scoped queries
//! - `bills` - Bill records, groups, merge application, settlement
//! - `settings` - Settings key/value store and the known-asset set
//!
//! The store's job in the pipeline is its transactional contract: the
//! create-root and apply-merge operations each run inside a single SQLite
//! transaction so no partial bill state is ever persisted.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::Result;

mod bills;
mod events;
mod rules;
mod settings;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool at the given path and run
    /// migrations.
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because each pooled
    /// connection would otherwise see its own empty in-memory database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = format!(
            "{}/tally_test_{}_{}.db",
            std::env::temp_dir().display(),
            std::process::id(),
            id
        );

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- WAL mode: better concurrency, readers don't block writers
            PRAGMA journal_mode = WAL;

            -- Cache size: ~8MB (2000 pages * 4KB default page size)
            PRAGMA cache_size = 2000;

            -- Synchronous NORMAL: good balance of safety and performance
            PRAGMA synchronous = NORMAL;

            -- Store temp tables in memory (faster for range queries)
            PRAGMA temp_store = MEMORY;

            -- Wait for locks instead of failing immediately under contention
            PRAGMA busy_timeout = 5000;

            -- Settings (key/value configuration consumed by the pipeline)
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Known assets (user-curated canonical account names; conflict
            -- resolution only, never fingerprinting)
            CREATE TABLE IF NOT EXISTS known_assets (
                name TEXT PRIMARY KEY,
                created_at_ms INTEGER NOT NULL
            );

            -- Raw events (immutable capture archive)
            CREATE TABLE IF NOT EXISTS raw_events (
                id INTEGER PRIMARY KEY,
                app TEXT NOT NULL,
                kind TEXT NOT NULL,                -- notification, sms, app-write, screen-text
                payload TEXT NOT NULL,             -- text, or JSON when structured=1
                structured INTEGER NOT NULL DEFAULT 0,
                captured_at_ms INTEGER NOT NULL,
                digest TEXT NOT NULL,              -- SHA-256 hex of payload text
                matched INTEGER NOT NULL DEFAULT 0,
                rule_name TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_raw_events_app ON raw_events(app);
            CREATE INDEX IF NOT EXISTS idx_raw_events_matched ON raw_events(matched);
            CREATE INDEX IF NOT EXISTS idx_raw_events_digest ON raw_events(digest);

            -- Rules (matching units, loaded per invocation; body is the
            -- JSON-tagged RuleBody)
            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY,
                app TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                origin TEXT NOT NULL DEFAULT 'system',  -- user rules may be deleted, system rules not
                priority INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                auto_record INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_rules_scope ON rules(app, kind, enabled);

            -- Bills (canonical records; roots have parent_id = group_id = id)
            CREATE TABLE IF NOT EXISTS bills (
                id INTEGER PRIMARY KEY,
                parent_id INTEGER NOT NULL DEFAULT 0,
                group_id INTEGER NOT NULL DEFAULT 0,
                kind TEXT NOT NULL,
                money_minor INTEGER NOT NULL,      -- fixed-point minor units
                timestamp_ms INTEGER NOT NULL,
                account_from TEXT NOT NULL DEFAULT '',
                account_to TEXT NOT NULL DEFAULT '',
                counterparty TEXT NOT NULL DEFAULT '',
                currency TEXT NOT NULL DEFAULT '',
                channels TEXT NOT NULL DEFAULT '[]',   -- JSON array of channel labels
                lineage TEXT NOT NULL DEFAULT '[]',    -- JSON array of raw event ids
                state TEXT NOT NULL DEFAULT 'open',
                auto_confirmed INTEGER NOT NULL DEFAULT 0,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL         -- last merge activity
            );

            CREATE INDEX IF NOT EXISTS idx_bills_fingerprint ON bills(money_minor, timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_bills_state ON bills(state);
            CREATE INDEX IF NOT EXISTS idx_bills_group ON bills(group_id);

            -- Merge audit (which event contributed which field values;
            -- metadata only, never participates in matching)
            CREATE TABLE IF NOT EXISTS merge_audit (
                id INTEGER PRIMARY KEY,
                bill_id INTEGER NOT NULL REFERENCES bills(id),
                event_id INTEGER NOT NULL,
                field TEXT NOT NULL,
                source_value TEXT NOT NULL,
                target_value TEXT NOT NULL,
                chosen TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_merge_audit_bill ON merge_audit(bill_id);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
