//! Service configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `REVIEWER_ASSIGN_*` environment variables (a `.env` file is honoured),
//! then CLI flags applied by the `serve` command.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//! db_path = "/var/lib/reviewer-assign/reviewers.db"
//! request_timeout_secs = 10
//! shutdown_timeout_secs = 10
//! log_level = "info"
//! log_format = "json"
//! dev_mode = false
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "REVIEWER_ASSIGN_CONFIG";
const ENV_PREFIX: &str = "REVIEWER_ASSIGN_";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines for local runs.
    #[default]
    Text,
    /// One JSON object per event for log shippers.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!(
                "Invalid log format '{}'. Valid options: text, json",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Deadline applied to every request's unit of work.
    pub request_timeout_secs: u64,
    /// How long in-flight requests may drain after a shutdown signal.
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Enables permissive CORS.
    pub dev_mode: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            db_path: PathBuf::from(".reviewer-assign/reviewers.db"),
            request_timeout_secs: 10,
            shutdown_timeout_secs: 10,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            dev_mode: false,
        }
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}{}: {}", ENV_PREFIX, key, e))
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse service config")
    }

    /// Defaults, then the config file (`explicit` or `$REVIEWER_ASSIGN_CONFIG`),
    /// then the process environment.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let mut config = match file {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which receives the key without the
    /// `REVIEWER_ASSIGN_` prefix (e.g. `PORT`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse_env("PORT", &v)?;
        }
        if let Some(v) = lookup("DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_env("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SHUTDOWN_TIMEOUT_SECS") {
            self.shutdown_timeout_secs = parse_env("SHUTDOWN_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            self.log_format = parse_env("LOG_FORMAT", &v)?;
        }
        if let Some(v) = lookup("DEV_MODE") {
            self.dev_mode = parse_env("DEV_MODE", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        if self.db_path.as_os_str().is_empty() {
            bail!("db_path must not be empty");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
