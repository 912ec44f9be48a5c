//! Server command implementation

use std::path::Path;

use anyhow::Result;

use super::open_db;

pub async fn cmd_serve(db_path: &Path, host: &str, port: u16) -> Result<()> {
    println!("🚀 Starting Tally analysis server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);
    if std::env::var("OLLAMA_HOST").is_ok() {
        println!("   🤖 Analyzer fallback: enabled (OLLAMA_HOST)");
    } else {
        println!("   Analyzer fallback: disabled (set OLLAMA_HOST to enable)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path)?;

    let config = tally_server::ServerConfig {
        allowed_origins: vec![],
    };

    tally_server::serve_with_config(db, host, port, config).await?;

    Ok(())
}
