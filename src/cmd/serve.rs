//! HTTP service command: `reviewer-assign serve`.

use anyhow::{Context, Result};
use std::path::PathBuf;

use reviewer_assign::assignment::server::{ServerConfig, start_server};
use reviewer_assign::config::ServiceConfig;
use reviewer_assign::logging::init_tracing;

pub struct ServeArgs {
    pub config: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub db_path: Option<PathBuf>,
    pub dev: bool,
    pub verbose: bool,
}

pub async fn cmd_serve(args: ServeArgs) -> Result<()> {
    let mut config =
        ServiceConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    if args.dev {
        config.dev_mode = true;
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.log_level, config.log_format)?;
    tracing::debug!(?config, "Resolved configuration");

    start_server(ServerConfig::from(&config)).await
}
