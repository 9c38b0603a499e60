//! Store boundary shared by the ingestion and aggregation handlers.
//!
//! Handlers depend only on the [`Store`] and [`Session`] traits, so they can
//! run against PostgreSQL in production and against an in-memory store in
//! tests. A [`Session`] is one connection, held for the duration of a single
//! handler invocation and released when dropped.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Metric, MetricSummary, Reading, StatUpdate};

#[cfg(test)]
pub mod memory;
mod postgres;

pub use postgres::PgStore;

// ---

/// Failures talking to the store.
#[derive(Debug, Error)]
pub enum StoreError {
    // ---
    #[error("failed to acquire store connection: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("{context}: {source}")]
    Statement {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    // ---
    pub fn statement(context: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| StoreError::Statement { context, source }
    }
}

/// Whether an upsert created the stat row or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Factory for per-invocation connections.
#[async_trait]
pub trait Store: Send + Sync {
    type Session: Session;

    /// Acquire a fresh connection for one handler invocation.
    async fn open(&self) -> Result<Self::Session, StoreError>;
}

/// Operations available on one open connection.
#[async_trait]
pub trait Session: Send {
    // ---
    /// Append one row to `sensor_data`.
    async fn insert_reading(&mut self, reading: &Reading) -> Result<(), StoreError>;

    /// AVG/MIN/MAX/COUNT over every non-null value of the metric's column.
    async fn summarize(&mut self, metric: Metric) -> Result<MetricSummary, StoreError>;

    /// Update the metric's stat row if present, insert it otherwise.
    ///
    /// The existence check and the write commit together; `last_updated`
    /// is set from the store's clock.
    async fn upsert_stat(&mut self, update: &StatUpdate) -> Result<Upsert, StoreError>;
}
