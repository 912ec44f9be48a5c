//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `default_db_path` / `open_db` - Database location and opening
//! - `cmd_init` - Initialize the database
//! - `cmd_status` - Show store statistics

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tally_core::db::Database;

/// Default database location: `<platform data dir>/tally/tally.db`,
/// falling back to the working directory.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("tally"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally.db")
}

/// Open the database, creating parent directories as needed.
pub fn open_db(db_path: &Path) -> Result<Database> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let path_str = db_path.to_str().context("Database path is not UTF-8")?;
    Database::new(path_str).context("Failed to open database")
}

pub fn cmd_init(db_path: &Path) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let _db = open_db(db_path)?;

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Start the server: tally serve");
    println!("  2. Point capture sources at POST /analysis");
    println!("  3. Curate known assets: POST /assets");

    Ok(())
}

pub fn cmd_status(db_path: &Path) -> Result<()> {
    use std::fs;

    println!();
    println!("📊 Tally Status");
    println!("   ─────────────────────────────────────────────────────────────");
    println!("   Database: {}", db_path.display());

    // Check if database file exists and get size
    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
        return Ok(());
    }

    match open_db(db_path) {
        Ok(db) => {
            let (bills, open) = db.bill_counts()?;
            let (events, unmatched) = db.event_counts()?;
            let rules = db.list_rules(None, None, None)?.len();
            let assets = db.list_known_assets()?.len();

            println!();
            println!("   Bills: {} ({} open)", bills, open);
            println!("   Events: {} ({} unmatched)", events, unmatched);
            println!("   Rules: {}", rules);
            println!("   Known assets: {}", assets);
        }
        Err(e) => {
            println!();
            println!("   ❌ Error opening database: {}", e);
        }
    }
    println!();

    Ok(())
}
