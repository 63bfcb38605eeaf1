//! Embedded SQLite ledger backend.

use super::store::{LedgerDocument, LedgerStore};
use crate::error::JobResult;
use crate::job::JobRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

const LAST_UPDATED_KEY: &str = "last_updated";

/// Stores one row per job plus a metadata row.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    url: String,
}

impl SqliteStore {
    /// Connects to `url` (creating the file if needed) and prepares the schema.
    pub async fn connect(url: &str) -> JobResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        if let Some(parent) = options
            .get_filename()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            url: url.to_string(),
        };
        store.migrate().await?;

        info!(url = %url, "SQLite ledger ready");
        Ok(store)
    }

    async fn migrate(&self) -> JobResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ledger_jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                record TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ledger_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn load(&self) -> JobResult<Option<LedgerDocument>> {
        let rows = sqlx::query("SELECT record FROM ledger_jobs")
            .fetch_all(&self.pool)
            .await?;
        let meta = sqlx::query("SELECT value FROM ledger_meta WHERE key = ?")
            .bind(LAST_UPDATED_KEY)
            .fetch_optional(&self.pool)
            .await?;

        if rows.is_empty() && meta.is_none() {
            return Ok(None);
        }

        let mut document = LedgerDocument::default();
        for row in rows {
            let json: String = row.try_get("record")?;
            let record: JobRecord = serde_json::from_str(&json)?;
            document.jobs.insert(record.id.clone(), record);
        }

        if let Some(row) = meta {
            let value: String = row.try_get("value")?;
            document.last_updated = DateTime::parse_from_rfc3339(&value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }

        Ok(Some(document))
    }

    async fn save(&self, document: &LedgerDocument) -> JobResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM ledger_jobs")
            .execute(&mut *tx)
            .await?;

        for (id, record) in &document.jobs {
            sqlx::query(
                "INSERT INTO ledger_jobs (id, status, record, last_updated) VALUES (?, ?, ?, ?)",
            )
            .bind(id.as_str())
            .bind(record.status.as_str())
            .bind(serde_json::to_string(record)?)
            .bind(record.last_updated.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        let last_updated = document.last_updated.unwrap_or_else(Utc::now).to_rfc3339();
        sqlx::query("INSERT OR REPLACE INTO ledger_meta (key, value) VALUES (?, ?)")
            .bind(LAST_UPDATED_KEY)
            .bind(last_updated)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(jobs = document.jobs.len(), "SQLite ledger saved");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.url)
    }
}
