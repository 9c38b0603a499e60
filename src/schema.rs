//! Database schema management for `codemetal-envstats`.
//!
//! Ensures the readings and stats tables exist, along with the trigger that
//! feeds the change listener. Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Channel the `sensor_data` trigger notifies on.
pub const CHANGE_CHANNEL: &str = "sensor_data_changes";

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; existing tables are left alone and the
/// notification function and trigger are replaced in place.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Simulated readings, appended by the ingestion timer
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_data (
            id            BIGSERIAL PRIMARY KEY,
            co2_level     DOUBLE PRECISION,
            temperature   DOUBLE PRECISION,
            humidity      DOUBLE PRECISION,
            timestamp_utc TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // One row per tracked metric
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregated_stats (
            stat_type    TEXT PRIMARY KEY,
            average      DOUBLE PRECISION NOT NULL,
            min_value    DOUBLE PRECISION NOT NULL,
            max_value    DOUBLE PRECISION NOT NULL,
            count        BIGINT           NOT NULL,
            last_updated TIMESTAMPTZ      NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE OR REPLACE FUNCTION notify_sensor_data_change() RETURNS trigger AS $$
        BEGIN
            PERFORM pg_notify(
                '{CHANGE_CHANNEL}',
                json_build_object(
                    'table', TG_TABLE_NAME,
                    'operation', TG_OP,
                    'at', NOW()
                )::text
            );
            RETURN NULL;
        END;
        $$ LANGUAGE plpgsql;
        "#
    ))
    .execute(&mut *tx)
    .await?;

    sqlx::query("DROP TRIGGER IF EXISTS sensor_data_change_notify ON sensor_data;")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER sensor_data_change_notify
            AFTER INSERT OR UPDATE OR DELETE ON sensor_data
            FOR EACH STATEMENT
            EXECUTE FUNCTION notify_sensor_data_change();
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
