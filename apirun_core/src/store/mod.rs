//! The state store. One contract, two backends, both reached through
//! `Store` so the executor never special-cases the backing technology.

mod postgres;
mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::error::ErrorKind;
use crate::retry::RetryPolicy;
use crate::Result;

/// `store` block of the config file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(rename = "type", default = "default_store_type")]
    pub store_type: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub save_response_body: bool,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub table_prefix: Option<String>,
    #[serde(default)]
    pub table_schema_migrations: Option<String>,
    #[serde(default)]
    pub table_migration_runs: Option<String>,
    #[serde(default)]
    pub table_stored_env: Option<String>,
}

fn default_store_type() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SqliteConfig {
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

fn default_sqlite_path() -> String {
    "apirun.db".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PostgresConfig {
    #[serde(default)]
    pub dsn: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub dbname: Option<String>,
    #[serde(default)]
    pub sslmode: Option<String>,
}

impl PostgresConfig {
    pub fn dsn(&self) -> Result<String> {
        if let Some(dsn) = &self.dsn {
            return Ok(dsn.clone());
        }
        let host = self.host.as_deref().unwrap_or("localhost");
        let port = self.port.unwrap_or(5432);
        let user = self.user.as_deref().unwrap_or("postgres");
        let password = self.password.as_deref().unwrap_or("");
        let dbname = self
            .dbname
            .as_deref()
            .ok_or_else(|| ErrorKind::Config("postgres store requires dbname or dsn".into()))?;
        let sslmode = self.sslmode.as_deref().unwrap_or("prefer");
        Ok(format!("postgres://{user}:{password}@{host}:{port}/{dbname}?sslmode={sslmode}"))
    }
}

/// Table names, resolved from `table_prefix` + per-table overrides.
#[derive(Debug, Clone)]
pub struct TableNames {
    pub schema_migrations: String,
    pub migration_runs: String,
    pub stored_env: String,
}

impl TableNames {
    pub fn resolve(config: &StoreConfig) -> TableNames {
        let prefix = config.table_prefix.as_deref();
        let pick = |explicit: &Option<String>, default_suffix: &str| -> String {
            if let Some(name) = explicit {
                if !name.is_empty() {
                    return name.clone();
                }
            }
            match prefix {
                Some(p) if !p.is_empty() => format!("{}_{}", p, default_suffix),
                _ => format!("apirun_{}", default_suffix),
            }
        };
        TableNames {
            schema_migrations: pick(&config.table_schema_migrations, "schema_migrations"),
            migration_runs: pick(&config.table_migration_runs, "migration_log"),
            stored_env: pick(&config.table_stored_env, "stored_env"),
        }
    }
}

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// Outcome of one run against a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,
    Failed,
    DryRun,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
            RunStatus::DryRun => "dry_run",
        }
    }
}

/// One append-only entry in the run-history table.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub version: u64,
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub request_summary: String,
    pub response_body: Option<String>,
}

/// The store contract. Every mutating call is expected to be wrapped
/// in the caller's `RetryPolicy`; the trait itself stays pure I/O.
#[async_trait]
pub trait Store: Send + Sync {
    async fn ensure_schema(&self) -> Result<()>;
    async fn is_applied(&self, version: u64) -> Result<bool>;
    /// Inserts the applied-version row and the stored-env snapshot for
    /// `version` in one transaction.
    async fn apply(&self, version: u64, extracted: &HashMap<String, String>) -> Result<()>;
    /// Deletes the applied-version row and its stored-env rows for
    /// `version` in one transaction.
    async fn remove(&self, version: u64) -> Result<()>;
    async fn list_applied(&self) -> Result<Vec<u64>>;
    async fn current_version(&self) -> Result<u64> {
        Ok(self.list_applied().await?.into_iter().max().unwrap_or(0))
    }
    /// Down-only aggregation helper: equal is a no-op, greater is an
    /// error, smaller deletes every applied version above `target`.
    async fn set_version(&self, target: u64) -> Result<()> {
        let current = self.current_version().await?;
        if target == current {
            return Ok(());
        }
        if target > current {
            return Err(ErrorKind::Store(format!(
                "cannot set_version to {} when current version is {}",
                target, current
            ))
            .into());
        }
        for version in self.list_applied().await?.into_iter().filter(|v| *v > target) {
            self.remove(version).await?;
        }
        Ok(())
    }
    async fn record_run(&self, record: &RunRecord) -> Result<()>;
    async fn list_runs(&self, limit: Option<u32>, all: bool) -> Result<Vec<RunRecord>>;
    async fn load_extracted_env(&self, version: u64) -> Result<HashMap<String, String>>;
}

/// Open a backend by `store.type`.
pub async fn open(config: &StoreConfig) -> Result<Box<dyn Store>> {
    match config.store_type.as_str() {
        "sqlite" => Ok(Box::new(SqliteStore::open(config).await?)),
        "postgres" => Ok(Box::new(PostgresStore::open(config).await?)),
        other => Err(ErrorKind::Config(format!("unknown store type '{}'", other)).into()),
    }
}

pub fn default_retry_policy() -> RetryPolicy {
    RetryPolicy::default()
}
