use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, info};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use super::{Direction, RunRecord, RunStatus, Store, StoreConfig, TableNames};
use crate::error::ErrorKind;
use crate::Result;

/// Networked backend. Same contract as `SqliteStore`; only the
/// driver and placeholder syntax differ.
pub struct PostgresStore {
    pool: PgPool,
    tables: TableNames,
}

fn store_err(e: impl std::fmt::Display) -> crate::error::Error {
    ErrorKind::Store(e.to_string()).into()
}

impl PostgresStore {
    pub async fn open(config: &StoreConfig) -> Result<PostgresStore> {
        debug!("opening postgres store");
        let dsn = config.postgres.dsn()?;
        let pool = PgPoolOptions::new().max_connections(5).connect(&dsn).await.map_err(store_err)?;
        let store = PostgresStore { pool, tables: TableNames::resolve(config) };
        store.ensure_schema().await?;
        Ok(store)
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn ensure_schema(&self) -> Result<()> {
        let t = &self.tables;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (version BIGINT PRIMARY KEY, applied_at TEXT NOT NULL)",
            t.schema_migrations
        ))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                id BIGSERIAL PRIMARY KEY, version BIGINT NOT NULL, direction TEXT NOT NULL, \
                started_at TEXT NOT NULL, finished_at TEXT NOT NULL, status TEXT NOT NULL, \
                status_code INTEGER, error_message TEXT, request_summary TEXT, response_body TEXT)",
            t.migration_runs
        ))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (version BIGINT NOT NULL, key TEXT NOT NULL, value TEXT NOT NULL, \
                PRIMARY KEY (version, key))",
            t.stored_env
        ))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn is_applied(&self, version: u64) -> Result<bool> {
        let row = sqlx::query(&format!("SELECT 1 FROM {} WHERE version = $1", self.tables.schema_migrations))
            .bind(version as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.is_some())
    }

    async fn apply(&self, version: u64, extracted: &HashMap<String, String>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query(&format!(
            "INSERT INTO {} (version, applied_at) VALUES ($1, $2) ON CONFLICT (version) DO NOTHING",
            self.tables.schema_migrations
        ))
        .bind(version as i64)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query(&format!("DELETE FROM {} WHERE version = $1", self.tables.stored_env))
            .bind(version as i64)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        for (key, value) in extracted {
            sqlx::query(&format!(
                "INSERT INTO {} (version, key, value) VALUES ($1, $2, $3)",
                self.tables.stored_env
            ))
            .bind(version as i64)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        info!("recorded version {} as applied", version);
        Ok(())
    }

    async fn remove(&self, version: u64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query(&format!("DELETE FROM {} WHERE version = $1", self.tables.schema_migrations))
            .bind(version as i64)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        sqlx::query(&format!("DELETE FROM {} WHERE version = $1", self.tables.stored_env))
            .bind(version as i64)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        tx.commit().await.map_err(store_err)?;
        info!("removed applied version {}", version);
        Ok(())
    }

    async fn list_applied(&self) -> Result<Vec<u64>> {
        let rows = sqlx::query(&format!("SELECT version FROM {} ORDER BY version ASC", self.tables.schema_migrations))
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(|r| r.get::<i64, _>("version") as u64).collect())
    }

    async fn record_run(&self, record: &RunRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (version, direction, started_at, finished_at, status, status_code, \
                error_message, request_summary, response_body) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            self.tables.migration_runs
        ))
        .bind(record.version as i64)
        .bind(record.direction.as_str())
        .bind(record.started_at.to_rfc3339())
        .bind(record.finished_at.to_rfc3339())
        .bind(record.status.as_str())
        .bind(record.status_code.map(|c| c as i32))
        .bind(&record.error_message)
        .bind(&record.request_summary)
        .bind(&record.response_body)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn list_runs(&self, limit: Option<u32>, all: bool) -> Result<Vec<RunRecord>> {
        let sql = if all || limit.is_none() {
            format!("SELECT * FROM {} ORDER BY id DESC", self.tables.migration_runs)
        } else {
            format!("SELECT * FROM {} ORDER BY id DESC LIMIT $1", self.tables.migration_runs)
        };
        let mut query = sqlx::query(&sql);
        if !all {
            if let Some(limit) = limit {
                query = query.bind(limit as i64);
            }
        }
        let rows = query.fetch_all(&self.pool).await.map_err(store_err)?;
        rows.into_iter()
            .map(|row| {
                let direction = match row.get::<String, _>("direction").as_str() {
                    "up" => Direction::Up,
                    _ => Direction::Down,
                };
                let status = match row.get::<String, _>("status").as_str() {
                    "ok" => RunStatus::Ok,
                    "dry_run" => RunStatus::DryRun,
                    _ => RunStatus::Failed,
                };
                Ok(RunRecord {
                    version: row.get::<i64, _>("version") as u64,
                    direction,
                    started_at: parse_ts(&row.get::<String, _>("started_at"))?,
                    finished_at: parse_ts(&row.get::<String, _>("finished_at"))?,
                    status,
                    status_code: row.get::<Option<i32>, _>("status_code").map(|c| c as u16),
                    error_message: row.get("error_message"),
                    request_summary: row.get("request_summary"),
                    response_body: row.get("response_body"),
                })
            })
            .collect()
    }

    async fn load_extracted_env(&self, version: u64) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(&format!("SELECT key, value FROM {} WHERE version = $1", self.tables.stored_env))
            .bind(version as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(|r| (r.get::<String, _>("key"), r.get::<String, _>("value"))).collect())
    }
}

fn parse_ts(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(store_err)
}

// Exercised only against a live postgres instance; left as a documented gap
// rather than a fragile embedded-postgres dev-dependency. `sqlite.rs`
// covers the contract.
