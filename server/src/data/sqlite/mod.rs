//! SQLite storage backend
//!
//! One connection pool per namespace database. Optimized for local, embedded use with:
//! - WAL mode so inserts from concurrent pipelines do not block each other's reads
//! - Busy timeout instead of immediate `SQLITE_BUSY` errors
//! - Capped collections enforced inside SQLite by triggers

mod schema;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::ConnectOptions;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::log::LevelFilter;

use crate::core::constants::{
    SQLITE_BUSY_TIMEOUT_SECS, SQLITE_COLLECTIONS_TABLE, SQLITE_MAX_CONNECTIONS,
};
use crate::data::error::DataError;
use crate::data::traits::{CollectionHandle, StorageConnection, StorageDriver};
use crate::data::types::{CappedLimits, CollectionOptions, Document};
use crate::utils::url::sanitize_url;

use schema::{
    capped_trigger_sql, clamp_i64, collections_table_sql, create_collection_sql,
    insert_collection_sql, insert_document_sql, quote_ident, select_limits_sql,
};

const BACKEND: &str = "sqlite";

/// Driver for `sqlite://<path>` URLs
#[derive(Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageDriver for SqliteDriver {
    async fn connect(&self, url: &str) -> Result<Arc<dyn StorageConnection>, DataError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DataError::connect(BACKEND, url, e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(SQLITE_BUSY_TIMEOUT_SECS))
            .log_statements(LevelFilter::Trace);

        // Every pooled connection to `:memory:` would be its own database
        let max_connections = if url.contains(":memory:") || url.contains("mode=memory") {
            1
        } else {
            SQLITE_MAX_CONNECTIONS
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DataError::connect(BACKEND, url, e))?;

        if let Err(e) = sqlx::query(&collections_table_sql()).execute(&pool).await {
            pool.close().await;
            return Err(DataError::connect(BACKEND, url, e));
        }

        tracing::debug!(url = %sanitize_url(url), "SQLite database connected");
        Ok(Arc::new(SqliteConnection {
            pool,
            url: sanitize_url(url),
        }))
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

struct SqliteConnection {
    pool: SqlitePool,
    url: String,
}

impl SqliteConnection {
    async fn stored_limits(&self, name: &str) -> Result<Option<CappedLimits>, sqlx::Error> {
        let row: Option<(Option<i64>, Option<i64>)> = sqlx::query_as(&select_limits_sql())
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(size, max)| CappedLimits {
            size: size.and_then(|v| u64::try_from(v).ok()),
            max: max.and_then(|v| u64::try_from(v).ok()),
        }))
    }

    async fn create_tables(
        &self,
        name: &str,
        options: &CollectionOptions,
        limits: &CappedLimits,
    ) -> Result<(), sqlx::Error> {
        let table = quote_ident(name);
        let options_json = serde_json::to_string(options.as_map())
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&create_collection_sql(&table))
            .execute(&mut *tx)
            .await?;
        if let Some(trigger) = capped_trigger_sql(name, limits) {
            sqlx::query(&trigger).execute(&mut *tx).await?;
        }
        sqlx::query(&insert_collection_sql())
            .bind(name)
            .bind(limits.is_capped())
            .bind(limits.size.map(clamp_i64))
            .bind(limits.max.map(clamp_i64))
            .bind(options_json)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }
}

#[async_trait]
impl StorageConnection for SqliteConnection {
    async fn create_collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> Result<Arc<dyn CollectionHandle>, DataError> {
        if name.is_empty() || name == SQLITE_COLLECTIONS_TABLE || name.starts_with("sqlite_") {
            return Err(DataError::provision(name, "reserved collection name"));
        }
        let limits = options
            .limits()
            .map_err(|reason| DataError::provision(name, reason))?;

        let existing = self
            .stored_limits(name)
            .await
            .map_err(|e| DataError::provision(name, e))?;

        let limits = match existing {
            Some(stored) => stored,
            None => {
                self.create_tables(name, options, &limits)
                    .await
                    .map_err(|e| DataError::provision(name, e))?;
                // A concurrent creator may have won the race; its definition is kept
                let stored = self
                    .stored_limits(name)
                    .await
                    .map_err(|e| DataError::provision(name, e))?
                    .unwrap_or(limits);
                tracing::debug!(
                    url = %self.url,
                    collection = %name,
                    size = ?stored.size,
                    max = ?stored.max,
                    "Collection created"
                );
                stored
            }
        };

        Ok(Arc::new(SqliteCollection {
            pool: self.pool.clone(),
            name: name.to_string(),
            table: quote_ident(name),
            limits,
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!(url = %self.url, "SQLite pool closed");
    }
}

struct SqliteCollection {
    pool: SqlitePool,
    name: String,
    table: String,
    limits: CappedLimits,
}

#[async_trait]
impl CollectionHandle for SqliteCollection {
    async fn insert_document(&self, document: &Document) -> Result<(), DataError> {
        let encoded =
            serde_json::to_string(document).map_err(|e| DataError::insert(&self.name, e))?;
        let doc_bytes = encoded.len() as u64;

        if let Some(size) = self.limits.size
            && doc_bytes > size
        {
            return Err(DataError::insert(
                &self.name,
                format!("document of {doc_bytes} bytes exceeds collection size {size}"),
            ));
        }

        let time = document.get("time").and_then(serde_json::Value::as_i64);
        sqlx::query(&insert_document_sql(&self.table))
            .bind(time)
            .bind(clamp_i64(doc_bytes))
            .bind(encoded)
            .execute(&self.pool)
            .await
            .map_err(|e| DataError::insert(&self.name, e))?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
