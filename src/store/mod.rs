//! Persistence seams for readings, aggregate buckets, alert rules and the
//! device registry.
//!
//! The pipeline only talks to these traits. [`PgStore`] implements all of them
//! on one connection pool; tests use the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AggregateBucket, AlertRule, Granularity, NewReading, Reading};

mod postgres;

#[cfg(test)]
pub mod memory;

pub use postgres::PgStore;

// ---

#[async_trait]
pub trait ReadingStore: Send + Sync {
    // ---
    /// Most recent stored reading of a device by server receipt time.
    async fn latest_for_device(&self, device_id: &str) -> Result<Option<Reading>, sqlx::Error>;

    /// Store `reading` if it passes the change-gate against the latest
    /// reading of its device. The lookup and the write happen atomically per
    /// device. Returns the stored row, or `None` when the reading was dropped.
    async fn append_if_changed(&self, reading: &NewReading) -> Result<Option<Reading>, sqlx::Error>;

    /// All readings with `from <= received_at < to`, ordered by device then time.
    async fn in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>, sqlx::Error>;

    /// Newest-first readings of one device.
    async fn recent_for_device(&self, device_id: &str, limit: i64) -> Result<Vec<Reading>, sqlx::Error>;
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    // ---
    /// Atomically delete every `granularity` bucket of `device_id` starting in
    /// `[from, to)` and insert `buckets` in their place.
    async fn replace_window(
        &self,
        device_id: &str,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        buckets: &[AggregateBucket],
    ) -> Result<(), sqlx::Error>;

    /// Buckets starting in `[from, to)`, ordered by device then start.
    async fn buckets(
        &self,
        device_id: Option<&str>,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregateBucket>, sqlx::Error>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    // ---
    /// Enabled, valid rules for a device. Invalid definitions are skipped.
    async fn enabled_rules_for_device(&self, device_id: &str) -> Result<Vec<AlertRule>, sqlx::Error>;

    /// Set `last_triggered_at = now` only if the rule has never fired or last
    /// fired at or before `now - cooldown`. Returns whether the update applied.
    async fn try_claim_trigger(
        &self,
        rule_id: Uuid,
        now: DateTime<Utc>,
        cooldown: chrono::TimeDelta,
    ) -> Result<bool, sqlx::Error>;
}

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn touch_last_seen(&self, device_id: &str, at: DateTime<Utc>) -> Result<(), sqlx::Error>;
}
