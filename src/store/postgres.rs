use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{BucketStore, DeviceRegistry, ReadingStore, RuleStore};
use crate::gate;
use crate::models::{AggregateBucket, AlertRule, AlertRuleRow, Granularity, NewReading, Reading};

// ---

const READING_COLUMNS: &str = "id, device_id, received_at, temperature, humidity, device_time";

/// PostgreSQL-backed implementation of every store seam.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn fetch_latest<'e, E>(executor: E, device_id: &str) -> Result<Option<Reading>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    // ---
    sqlx::query_as::<_, Reading>(&format!(
        "SELECT {READING_COLUMNS} FROM readings
         WHERE device_id = $1
         ORDER BY received_at DESC, id DESC
         LIMIT 1"
    ))
    .bind(device_id)
    .fetch_optional(executor)
    .await
}

#[derive(sqlx::FromRow)]
struct BucketRow {
    device_id: String,
    bucket_start: DateTime<Utc>,
    median_temperature: f64,
}

#[async_trait]
impl ReadingStore for PgStore {
    // ---
    async fn latest_for_device(&self, device_id: &str) -> Result<Option<Reading>, sqlx::Error> {
        // ---
        fetch_latest(&self.pool, device_id).await
    }

    async fn append_if_changed(&self, reading: &NewReading) -> Result<Option<Reading>, sqlx::Error> {
        // ---
        let mut tx = self.pool.begin().await?;

        // Serializes gate decisions per device for the rest of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&reading.device_id)
            .execute(&mut *tx)
            .await?;

        let prior = fetch_latest(&mut *tx, &reading.device_id).await?;

        if !gate::is_material_change(prior.as_ref(), reading) {
            tx.commit().await?;
            return Ok(None);
        }

        let stored = sqlx::query_as::<_, Reading>(&format!(
            "INSERT INTO readings (device_id, received_at, temperature, humidity, device_time)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {READING_COLUMNS}"
        ))
        .bind(&reading.device_id)
        .bind(reading.received_at)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.device_time)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(stored))
    }

    async fn in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>, sqlx::Error> {
        // ---
        sqlx::query_as::<_, Reading>(&format!(
            "SELECT {READING_COLUMNS} FROM readings
             WHERE received_at >= $1 AND received_at < $2
             ORDER BY device_id, received_at"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
    }

    async fn recent_for_device(&self, device_id: &str, limit: i64) -> Result<Vec<Reading>, sqlx::Error> {
        // ---
        sqlx::query_as::<_, Reading>(&format!(
            "SELECT {READING_COLUMNS} FROM readings
             WHERE device_id = $1
             ORDER BY received_at DESC, id DESC
             LIMIT $2"
        ))
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[async_trait]
impl BucketStore for PgStore {
    // ---
    async fn replace_window(
        &self,
        device_id: &str,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        buckets: &[AggregateBucket],
    ) -> Result<(), sqlx::Error> {
        // ---
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM aggregate_buckets
            WHERE device_id = $1
              AND granularity = $2
              AND bucket_start >= $3
              AND bucket_start < $4
            "#,
        )
        .bind(device_id)
        .bind(granularity.as_str())
        .bind(from)
        .bind(to)
        .execute(&mut *tx)
        .await?;

        let starts: Vec<DateTime<Utc>> = buckets.iter().map(|b| b.bucket_start).collect();
        let medians: Vec<f64> = buckets.iter().map(|b| b.median_temperature).collect();

        sqlx::query(
            r#"
            INSERT INTO aggregate_buckets (device_id, granularity, bucket_start, median_temperature)
            SELECT $1, $2, t.bucket_start, t.median_temperature
            FROM UNNEST($3::timestamptz[], $4::float8[]) AS t(bucket_start, median_temperature)
            ON CONFLICT (device_id, granularity, bucket_start) DO UPDATE SET
                median_temperature = EXCLUDED.median_temperature
            "#,
        )
        .bind(device_id)
        .bind(granularity.as_str())
        .bind(starts)
        .bind(medians)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    async fn buckets(
        &self,
        device_id: Option<&str>,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregateBucket>, sqlx::Error> {
        // ---
        let rows = sqlx::query_as::<_, BucketRow>(
            r#"
            SELECT device_id, bucket_start, median_temperature
            FROM aggregate_buckets
            WHERE granularity = $1
              AND bucket_start >= $2
              AND bucket_start < $3
              AND ($4::text IS NULL OR device_id = $4)
            ORDER BY device_id, bucket_start
            "#,
        )
        .bind(granularity.as_str())
        .bind(from)
        .bind(to)
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AggregateBucket {
                device_id: row.device_id,
                granularity,
                bucket_start: row.bucket_start,
                median_temperature: row.median_temperature,
            })
            .collect())
    }
}

#[async_trait]
impl RuleStore for PgStore {
    // ---
    async fn enabled_rules_for_device(&self, device_id: &str) -> Result<Vec<AlertRule>, sqlx::Error> {
        // ---
        let rows = sqlx::query_as::<_, AlertRuleRow>(
            r#"
            SELECT id, device_id, metric, min_threshold, max_threshold,
                   start_time, end_time, start_date, end_date, weekdays,
                   emails, enabled, last_triggered_at
            FROM alert_rules
            WHERE device_id = $1 AND enabled
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match AlertRule::try_from(row) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        tracing::warn!(rule_id = %id, error = %e, "Skipping invalid alert rule");
                        None
                    }
                }
            })
            .collect())
    }

    async fn try_claim_trigger(
        &self,
        rule_id: Uuid,
        now: DateTime<Utc>,
        cooldown: TimeDelta,
    ) -> Result<bool, sqlx::Error> {
        // ---
        let result = sqlx::query(
            r#"
            UPDATE alert_rules
            SET last_triggered_at = $2
            WHERE id = $1
              AND (last_triggered_at IS NULL OR last_triggered_at <= $3)
            "#,
        )
        .bind(rule_id)
        .bind(now)
        .bind(now - cooldown)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl DeviceRegistry for PgStore {
    // ---
    async fn touch_last_seen(&self, device_id: &str, at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO devices (id, last_seen) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET
                last_seen = GREATEST(devices.last_seen, EXCLUDED.last_seen)
            "#,
        )
        .bind(device_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
