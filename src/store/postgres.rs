//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use sqlx::{pool::PoolConnection, Connection, PgPool, Postgres};

use super::{Session, Store, StoreError, Upsert};
use crate::models::{AggregatedStat, Metric, MetricSummary, Reading, StatUpdate};

// ---

/// Pool-backed store; each [`Store::open`] checks out one pooled connection.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Round-trip a trivial query to confirm the store is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        // ---
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Connection)?;
        Ok(())
    }

    /// All persisted stats, ordered by stat type.
    pub async fn list_stats(&self) -> Result<Vec<AggregatedStat>, StoreError> {
        // ---
        sqlx::query_as::<_, AggregatedStat>(
            r#"
            SELECT stat_type, average, min_value, max_value, count, last_updated
            FROM aggregated_stats
            ORDER BY stat_type
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::statement("failed to list aggregated stats"))
    }

    pub async fn fetch_stat(&self, metric: Metric) -> Result<Option<AggregatedStat>, StoreError> {
        // ---
        sqlx::query_as::<_, AggregatedStat>(
            r#"
            SELECT stat_type, average, min_value, max_value, count, last_updated
            FROM aggregated_stats
            WHERE stat_type = $1
            "#,
        )
        .bind(metric.stat_type())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::statement("failed to fetch aggregated stat"))
    }
}

#[async_trait]
impl Store for PgStore {
    type Session = PgSession;

    async fn open(&self) -> Result<PgSession, StoreError> {
        let conn = self.pool.acquire().await.map_err(StoreError::Connection)?;
        Ok(PgSession { conn })
    }
}

/// One pooled connection, returned to the pool on drop.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl Session for PgSession {
    // ---
    async fn insert_reading(&mut self, reading: &Reading) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO sensor_data (co2_level, temperature, humidity, timestamp_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(reading.co2_level)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.timestamp)
        .execute(&mut *self.conn)
        .await
        .map_err(StoreError::statement("failed to insert reading"))?;

        Ok(())
    }

    async fn summarize(&mut self, metric: Metric) -> Result<MetricSummary, StoreError> {
        // ---
        let sql = format!(
            r#"
            SELECT AVG({col}), MIN({col}), MAX({col}), COUNT({col})
            FROM sensor_data
            WHERE {col} IS NOT NULL
            "#,
            col = metric.column()
        );

        let (average, min, max, count) =
            sqlx::query_as::<_, (Option<f64>, Option<f64>, Option<f64>, i64)>(&sql)
                .fetch_one(&mut *self.conn)
                .await
                .map_err(StoreError::statement("failed to summarize readings"))?;

        Ok(MetricSummary {
            average,
            min,
            max,
            count,
        })
    }

    async fn upsert_stat(&mut self, update: &StatUpdate) -> Result<Upsert, StoreError> {
        // ---
        let stat_type = update.metric.stat_type();
        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(StoreError::statement("failed to begin stat transaction"))?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM aggregated_stats WHERE stat_type = $1)")
                .bind(stat_type)
                .fetch_one(&mut *tx)
                .await
                .map_err(StoreError::statement("failed to check for existing stat"))?;

        let outcome = if exists {
            sqlx::query(
                r#"
                UPDATE aggregated_stats
                SET average      = $1,
                    min_value    = $2,
                    max_value    = $3,
                    count        = $4,
                    last_updated = NOW()
                WHERE stat_type = $5
                "#,
            )
            .bind(update.average)
            .bind(update.min_value)
            .bind(update.max_value)
            .bind(update.count)
            .bind(stat_type)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::statement("failed to update stat"))?;
            Upsert::Updated
        } else {
            sqlx::query(
                r#"
                INSERT INTO aggregated_stats
                    (stat_type, average, min_value, max_value, count, last_updated)
                VALUES ($1, $2, $3, $4, $5, NOW())
                "#,
            )
            .bind(stat_type)
            .bind(update.average)
            .bind(update.min_value)
            .bind(update.max_value)
            .bind(update.count)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::statement("failed to insert stat"))?;
            Upsert::Inserted
        };

        tx.commit()
            .await
            .map_err(StoreError::statement("failed to commit stat"))?;

        Ok(outcome)
    }
}
