//! Database bootstrap command: `reviewer-assign init-db`.

use anyhow::{Context, Result};
use std::path::PathBuf;

use reviewer_assign::assignment::server::open_database;
use reviewer_assign::config::ServiceConfig;
use reviewer_assign::logging::init_tracing;

pub fn cmd_init_db(db_path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let config = ServiceConfig::resolve(None).context("Failed to load configuration")?;
    let level = if verbose { "debug" } else { config.log_level.as_str() };
    init_tracing(level, config.log_format)?;

    let db_path = db_path.unwrap_or(config.db_path);
    open_database(&db_path)?;
    println!("Database initialized at {}", db_path.display());
    Ok(())
}
