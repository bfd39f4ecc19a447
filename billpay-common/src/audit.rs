use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{error, warn};

/// Files reconciled per invocation.
pub const FILES_PER_RUN: usize = 2;

/// One reconciliation row, written once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub file_name_1: String,
    pub file_name_2: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub raw_count_file_1: usize,
    pub raw_count_file_2: usize,
    pub duplicate_count: usize,
    pub merged_count: usize,
    pub files_loaded: usize,
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("failed to create audit connection pool: {0}")]
    PoolCreation(#[source] sqlx::Error),
    #[error("failed to obtain an audit database connection: {0}")]
    Connection(#[source] sqlx::Error),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Insert `record`. Returns `Ok(false)` when the row was not written; only a failure
    /// to reach the database is an error.
    async fn record(&self, record: &AuditRecord) -> Result<bool, AuditError>;
}

fn as_db_int(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Audit table in PostgreSQL.
pub struct PgAuditSink {
    table: String,
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new_from_pool(table: &str, pool: PgPool) -> Self {
        Self {
            table: table.to_owned(),
            pool,
        }
    }

    /// Connections are opened on first use, so a database outage surfaces when the row
    /// is written rather than at start-up.
    pub fn connect_lazy(
        table: &str,
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, AuditError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(AuditError::PoolCreation)?;
        Ok(Self::new_from_pool(table, pool))
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<bool, AuditError> {
        let mut connection = self.pool.acquire().await.map_err(AuditError::Connection)?;

        // TODO: validate the table name when loading config, sqlx can't bind identifiers.
        let query = format!(
            r#"
INSERT INTO {}
    (file_name_1, file_name_2, started_at, finished_at, raw_count_file_1,
     raw_count_file_2, duplicate_count, merged_count, files_loaded)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
            &self.table
        );

        let result = sqlx::query(&query)
            .bind(&record.file_name_1)
            .bind(&record.file_name_2)
            .bind(record.started_at)
            .bind(record.finished_at)
            .bind(as_db_int(record.raw_count_file_1))
            .bind(as_db_int(record.raw_count_file_2))
            .bind(as_db_int(record.duplicate_count))
            .bind(as_db_int(record.merged_count))
            .bind(as_db_int(record.files_loaded))
            .execute(&mut *connection)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                warn!(table = self.table, "audit insert affected no rows");
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(error) => {
                error!(table = self.table, %error, "audit insert failed");
                Ok(false)
            }
        }
    }
}

/// Outcome a `RecordingAuditSink` reports for every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditOutcome {
    #[default]
    Written,
    NotWritten,
    ConnectionFailure,
}

/// Keeps every record in memory and answers with a fixed outcome.
#[derive(Default)]
pub struct RecordingAuditSink {
    outcome: AuditOutcome,
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new(outcome: AuditOutcome) -> Self {
        Self {
            outcome,
            records: Mutex::default(),
        }
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<bool, AuditError> {
        match self.outcome {
            AuditOutcome::ConnectionFailure => {
                Err(AuditError::Connection(sqlx::Error::PoolTimedOut))
            }
            AuditOutcome::NotWritten => Ok(false),
            AuditOutcome::Written => {
                self.records
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(record.clone());
                Ok(true)
            }
        }
    }
}
