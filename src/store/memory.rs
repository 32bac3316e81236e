//! In-memory store used by the test suite. Mirrors the Postgres semantics,
//! including per-device atomic gating and the conditional throttle claim.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use super::{BucketStore, DeviceRegistry, ReadingStore, RuleStore};
use crate::gate;
use crate::models::{AggregateBucket, AlertRule, Granularity, NewReading, Reading};

type BucketKey = (String, Granularity, DateTime<Utc>);

#[derive(Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<Reading>>,
    buckets: Mutex<BTreeMap<BucketKey, f64>>,
    rules: Mutex<Vec<AlertRule>>,
    last_seen: Mutex<HashMap<String, DateTime<Utc>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<AlertRule>) -> Self {
        let store = Self::default();
        *store.rules.lock().unwrap() = rules;
        store
    }

    /// Make every subsequent write fail as if the database were unreachable.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings.lock().unwrap().clone()
    }

    pub fn rule(&self, id: Uuid) -> Option<AlertRule> {
        self.rules.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    pub fn last_seen(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.lock().unwrap().get(device_id).copied()
    }

    pub fn insert_reading(&self, reading: NewReading) -> Reading {
        // ---
        let mut readings = self.readings.lock().unwrap();
        let stored = Reading {
            id: readings.len() as i64 + 1,
            device_id: reading.device_id,
            received_at: reading.received_at,
            temperature: reading.temperature,
            humidity: reading.humidity,
            device_time: reading.device_time,
        };
        readings.push(stored.clone());
        stored
    }

    fn check_writable(&self) -> Result<(), sqlx::Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }

    fn latest(readings: &[Reading], device_id: &str) -> Option<Reading> {
        readings
            .iter()
            .filter(|r| r.device_id == device_id)
            .max_by_key(|r| (r.received_at, r.id))
            .cloned()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    // ---
    async fn latest_for_device(&self, device_id: &str) -> Result<Option<Reading>, sqlx::Error> {
        Ok(Self::latest(&self.readings.lock().unwrap(), device_id))
    }

    async fn append_if_changed(&self, reading: &NewReading) -> Result<Option<Reading>, sqlx::Error> {
        // ---
        self.check_writable()?;
        let mut readings = self.readings.lock().unwrap();
        let prior = Self::latest(&readings, &reading.device_id);
        if !gate::is_material_change(prior.as_ref(), reading) {
            return Ok(None);
        }

        let stored = Reading {
            id: readings.len() as i64 + 1,
            device_id: reading.device_id.clone(),
            received_at: reading.received_at,
            temperature: reading.temperature,
            humidity: reading.humidity,
            device_time: reading.device_time,
        };
        readings.push(stored.clone());
        Ok(Some(stored))
    }

    async fn in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>, sqlx::Error> {
        // ---
        let mut matched: Vec<Reading> = self
            .readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.received_at >= from && r.received_at < to)
            .cloned()
            .collect();
        matched.sort_by(|a, b| (&a.device_id, a.received_at).cmp(&(&b.device_id, b.received_at)));
        Ok(matched)
    }

    async fn recent_for_device(&self, device_id: &str, limit: i64) -> Result<Vec<Reading>, sqlx::Error> {
        // ---
        let mut matched: Vec<Reading> = self
            .readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect();
        matched.sort_by_key(|r| std::cmp::Reverse((r.received_at, r.id)));
        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
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
        self.check_writable()?;
        let mut stored = self.buckets.lock().unwrap();
        stored.retain(|(device, g, start), _| {
            !(device == device_id && *g == granularity && *start >= from && *start < to)
        });
        for bucket in buckets {
            stored.insert(
                (bucket.device_id.clone(), bucket.granularity, bucket.bucket_start),
                bucket.median_temperature,
            );
        }
        Ok(())
    }

    async fn buckets(
        &self,
        device_id: Option<&str>,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregateBucket>, sqlx::Error> {
        // ---
        Ok(self
            .buckets
            .lock()
            .unwrap()
            .iter()
            .filter(|((device, g, start), _)| {
                *g == granularity
                    && *start >= from
                    && *start < to
                    && device_id.map_or(true, |id| id == device)
            })
            .map(|((device, g, start), median)| AggregateBucket {
                device_id: device.clone(),
                granularity: *g,
                bucket_start: *start,
                median_temperature: *median,
            })
            .collect())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    // ---
    async fn enabled_rules_for_device(&self, device_id: &str) -> Result<Vec<AlertRule>, sqlx::Error> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.enabled && r.device_id == device_id && r.validate().is_ok())
            .cloned()
            .collect())
    }

    async fn try_claim_trigger(
        &self,
        rule_id: Uuid,
        now: DateTime<Utc>,
        cooldown: TimeDelta,
    ) -> Result<bool, sqlx::Error> {
        // ---
        self.check_writable()?;
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter_mut().find(|r| r.id == rule_id) else {
            return Ok(false);
        };
        let due = rule.last_triggered_at.map_or(true, |last| last <= now - cooldown);
        if due {
            rule.last_triggered_at = Some(now);
        }
        Ok(due)
    }
}

#[async_trait]
impl DeviceRegistry for MemoryStore {
    // ---
    async fn touch_last_seen(&self, device_id: &str, at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        // ---
        self.check_writable()?;
        let mut seen = self.last_seen.lock().unwrap();
        let entry = seen.entry(device_id.to_string()).or_insert(at);
        *entry = (*entry).max(at);
        Ok(())
    }
}
