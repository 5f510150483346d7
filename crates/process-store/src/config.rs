use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::store_engine::EngineOptions;

pub const DEFAULT_ACTOR: &str = "Current User";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub process_db_name: String,
    pub audit_db_name: String,
    pub analytics_db_name: String,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
    pub default_actor: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            process_db_name: "process_records".into(),
            audit_db_name: "process_audit".into(),
            analytics_db_name: "process_analytics".into(),
            pool_size: 4,
            busy_timeout_ms: 5000,
            default_actor: DEFAULT_ACTOR.into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let defaults = Self::default();

        Ok(Self {
            data_dir: env::var("PROCESS_STORE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            process_db_name: env::var("PROCESS_DB_NAME").unwrap_or(defaults.process_db_name),
            audit_db_name: env::var("AUDIT_DB_NAME").unwrap_or(defaults.audit_db_name),
            analytics_db_name: env::var("ANALYTICS_DB_NAME").unwrap_or(defaults.analytics_db_name),
            pool_size: env::var("DB_POOL_SIZE")
                .unwrap_or_else(|_| "4".into())
                .parse()
                .context("DB_POOL_SIZE must be a positive integer")?,
            busy_timeout_ms: env::var("DB_BUSY_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".into())
                .parse()
                .context("DB_BUSY_TIMEOUT_MS must be a number of milliseconds")?,
            default_actor: env::var("AUDIT_DEFAULT_ACTOR").unwrap_or(defaults.default_actor),
        })
    }

    /// Default settings with every database under `data_dir`.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self { data_dir: data_dir.as_ref().to_path_buf(), ..Self::default() }
    }

    pub fn database_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite3", name))
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions { pool_size: self.pool_size, busy_timeout_ms: self.busy_timeout_ms }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Data Directory: {}", self.data_dir.display());
        info!("- Process Database: {}", self.process_db_name);
        info!("- Audit Database: {}", self.audit_db_name);
        info!("- Analytics Database: {}", self.analytics_db_name);
        info!("- Pool Size: {}", self.pool_size);
        info!("- Busy Timeout: {}ms", self.busy_timeout_ms);
        info!("- Default Actor: {}", self.default_actor);
    }
}
