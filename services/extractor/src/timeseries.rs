use crate::blob_store::BlobReference;
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::naming::{DatasetScope, TIMESERIES_COLLECTION};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Metadata linking a capture instant to its stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Reference returned by the blob store
    pub blob_reference: BlobReference,
    /// Artifact filename
    pub filename: String,
    /// Path of the local mirror copy
    pub local_path: String,
    /// Row index within the dataset
    pub row_index: u64,
}

/// One time-series document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesEntry {
    /// Capture time of the frame
    pub timestamp: DateTime<Utc>,
    pub metadata: EntryMetadata,
}

/// Whether `ensure_collection` had to create anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

/// Append-only, time-indexed metadata store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    /// Create the scope's time-partitioned collection unless it exists.
    ///
    /// An existing collection is left as is, whatever its layout.
    async fn ensure_collection(&self, scope: &DatasetScope) -> Result<Provisioned, StoreError>;

    async fn append(&self, scope: &DatasetScope, entry: &TimeSeriesEntry) -> Result<(), StoreError>;
}

/// Quoted `"schema"."table"` name of the scope's collection.
///
/// Suffixes are limited to `[A-Za-z0-9_-]`, so quoting is enough.
fn qualified_table(scope: &DatasetScope) -> String {
    format!("\"{}\".\"{}\"", scope.namespace(), TIMESERIES_COLLECTION)
}

/// DDL for a fresh collection: range-partitioned on `timestamp`, with a
/// default partition so inserts never need a matching range.
fn create_collection_statements(scope: &DatasetScope) -> Vec<String> {
    let schema = scope.namespace();
    let table = qualified_table(scope);

    vec![
        format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema),
        format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                "timestamp" TIMESTAMPTZ NOT NULL,
                metadata JSONB NOT NULL
            ) PARTITION BY RANGE ("timestamp")"#,
            table
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\".\"{}_default\" PARTITION OF {} DEFAULT",
            schema, TIMESERIES_COLLECTION, table
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS \"{}_timestamp_idx\" ON {} (\"timestamp\")",
            TIMESERIES_COLLECTION, table
        ),
    ]
}

/// PostgreSQL-backed time-series sink
pub struct PgTimeSeriesSink {
    pool: PgPool,
}

impl PgTimeSeriesSink {
    /// Create a new sink with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    async fn collection_exists(&self, scope: &DatasetScope) -> Result<bool, StoreError> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
            "#,
        )
        .bind(scope.namespace())
        .bind(TIMESERIES_COLLECTION)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }
}

#[async_trait]
impl TimeSeriesSink for PgTimeSeriesSink {
    #[instrument(skip(self), fields(suffix = %scope.suffix()))]
    async fn ensure_collection(&self, scope: &DatasetScope) -> Result<Provisioned, StoreError> {
        if self.collection_exists(scope).await? {
            debug!(table = %qualified_table(scope), "Time-series collection already exists");
            return Ok(Provisioned::AlreadyExists);
        }

        let mut tx = self.pool.begin().await?;
        for statement in create_collection_statements(scope) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!(table = %qualified_table(scope), "Created time-series collection");

        Ok(Provisioned::Created)
    }

    #[instrument(skip(self, entry), fields(suffix = %scope.suffix(), index = entry.metadata.row_index))]
    async fn append(&self, scope: &DatasetScope, entry: &TimeSeriesEntry) -> Result<(), StoreError> {
        let metadata = serde_json::to_value(&entry.metadata)?;
        let sql = format!(
            "INSERT INTO {} (\"timestamp\", metadata) VALUES ($1, $2)",
            qualified_table(scope)
        );

        sqlx::query(&sql)
            .bind(entry.timestamp)
            .bind(&metadata)
            .execute(&self.pool)
            .await?;

        debug!(
            timestamp = %entry.timestamp,
            filename = %entry.metadata.filename,
            "Time-series entry appended"
        );

        Ok(())
    }
}
