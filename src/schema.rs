//! Database schema management for `heatsync-core`.
//!
//! Ensures required tables and indexes exist before ingestion starts.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

const STATEMENTS: &[&str] = &[
    // Raw readings; append-only from this service's point of view.
    r#"
    CREATE TABLE IF NOT EXISTS readings (
        id          BIGSERIAL PRIMARY KEY,
        device_id   TEXT             NOT NULL,
        received_at TIMESTAMPTZ      NOT NULL,
        temperature DOUBLE PRECISION NOT NULL,
        humidity    DOUBLE PRECISION,
        device_time TIMESTAMPTZ
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_readings_device_received
        ON readings (device_id, received_at DESC);
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_readings_received
        ON readings (received_at);
    "#,
    // Median buckets, one per (device, granularity, bucket start).
    r#"
    CREATE TABLE IF NOT EXISTS aggregate_buckets (
        id                 BIGSERIAL PRIMARY KEY,
        device_id          TEXT             NOT NULL,
        granularity        TEXT             NOT NULL,
        bucket_start       TIMESTAMPTZ      NOT NULL,
        median_temperature DOUBLE PRECISION NOT NULL,
        UNIQUE (device_id, granularity, bucket_start)
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_aggregate_buckets_granularity_start
        ON aggregate_buckets (granularity, bucket_start);
    "#,
    // Rules are managed elsewhere; this service only updates last_triggered_at.
    r#"
    CREATE TABLE IF NOT EXISTS alert_rules (
        id                UUID PRIMARY KEY,
        device_id         TEXT    NOT NULL,
        metric            TEXT    NOT NULL CHECK (metric IN ('temperature', 'humidity')),
        min_threshold     DOUBLE PRECISION,
        max_threshold     DOUBLE PRECISION,
        start_time        TEXT,
        end_time          TEXT,
        start_date        DATE,
        end_date          DATE,
        weekdays          INTEGER[],
        emails            TEXT[]  NOT NULL,
        enabled           BOOLEAN NOT NULL DEFAULT TRUE,
        last_triggered_at TIMESTAMPTZ
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_alert_rules_device
        ON alert_rules (device_id) WHERE enabled;
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        id        TEXT PRIMARY KEY,
        last_seen TIMESTAMPTZ NOT NULL
    );
    "#,
];

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist. Errors are
/// propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    for statement in STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}
