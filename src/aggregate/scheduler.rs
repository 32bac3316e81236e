//! Timer wiring for the aggregator.
//!
//! Three tiers recompute trailing windows on fixed cron schedules. The
//! windows overlap their previous run on purpose so late readings are folded
//! in by the next execution.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use super::Aggregator;
use crate::models::Granularity;

// ---

/// A set of granularities recomputed together over one trailing window.
#[derive(Debug, Clone, Copy)]
pub struct Tier {
    pub name: &'static str,
    pub cron: &'static str,
    pub granularities: &'static [Granularity],
    pub lookback_secs: i64,
}

impl Tier {
    /// The `[from, to)` window this tier recomputes when fired at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - TimeDelta::seconds(self.lookback_secs), now)
    }
}

pub const TIERS: [Tier; 3] = [
    Tier {
        name: "minutely",
        cron: "0 * * * * *",
        granularities: &[Granularity::Minute, Granularity::FiveMinutes],
        lookback_secs: 15 * 60,
    },
    Tier {
        name: "hourly",
        cron: "0 0 * * * *",
        granularities: &[Granularity::Hour, Granularity::SixHours],
        lookback_secs: 6 * 3600,
    },
    Tier {
        name: "daily",
        cron: "0 0 0 * * *",
        granularities: &[Granularity::Day],
        lookback_secs: 2 * 86_400,
    },
];

/// Run every granularity of `tier` for the window ending at `now`.
///
/// Each granularity is its own run: a failure is logged and the next
/// granularity still executes.
pub async fn run_tier(aggregator: &Aggregator, tier: &Tier, now: DateTime<Utc>) {
    // ---
    let (from, to) = tier.window(now);
    for &granularity in tier.granularities {
        if let Err(e) = aggregator.run(granularity, from, to).await {
            error!(tier = tier.name, error = %e, "Aggregation run aborted");
        }
    }
}

/// Owns the cron scheduler driving the aggregation tiers.
pub struct AggregationScheduler {
    scheduler: JobScheduler,
}

impl AggregationScheduler {
    // ---
    /// Register every tier and start the scheduler.
    pub async fn start(aggregator: Arc<Aggregator>) -> Result<Self> {
        // ---
        let scheduler = JobScheduler::new().await?;

        for tier in TIERS {
            // At most one execution per tier; overlapping ticks are skipped.
            let guard = Arc::new(Mutex::new(()));
            let aggregator = aggregator.clone();

            let job = Job::new_async(tier.cron, move |_uuid, _lock| {
                let guard = guard.clone();
                let aggregator = aggregator.clone();

                Box::pin(async move {
                    let Ok(_running) = guard.try_lock() else {
                        warn!(tier = tier.name, "Previous aggregation still running, skipping tick");
                        return;
                    };
                    run_tier(&aggregator, &tier, Utc::now()).await;
                })
            })?;

            scheduler.add(job).await?;
            info!(tier = tier.name, cron = tier.cron, "Aggregation tier scheduled");
        }

        scheduler.start().await?;
        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("Aggregation scheduler stopped");
        Ok(())
    }
}

/// Run every tier once, e.g. to catch up after downtime.
pub async fn catch_up(aggregator: &Aggregator, now: DateTime<Utc>) {
    for tier in &TIERS {
        run_tier(aggregator, tier, now).await;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::NewReading;
    use crate::store::memory::MemoryStore;
    use crate::store::BucketStore;
    use chrono::TimeZone;

    #[test]
    fn test_tier_windows() {
        // ---
        let now = Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap();

        assert_eq!(TIERS[0].window(now).0, now - TimeDelta::minutes(15));
        assert_eq!(TIERS[1].window(now).0, now - TimeDelta::hours(6));
        assert_eq!(TIERS[2].window(now).0, now - TimeDelta::days(2));
        assert!(TIERS.iter().all(|t| t.window(now).1 == now));
    }

    #[test]
    fn test_every_granularity_is_scheduled_once() {
        // ---
        let mut scheduled: Vec<Granularity> =
            TIERS.iter().flat_map(|t| t.granularities.iter().copied()).collect();
        scheduled.sort();
        assert_eq!(scheduled, Granularity::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_catch_up_fills_every_granularity() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let now = Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap();
        store.insert_reading(NewReading {
            device_id: "d1".to_string(),
            temperature: 21.0,
            humidity: None,
            received_at: now - TimeDelta::minutes(3),
            device_time: None,
        });
        let aggregator = Aggregator::new(store.clone(), store.clone());

        catch_up(&aggregator, now).await;

        for granularity in Granularity::ALL {
            let buckets = store
                .buckets(Some("d1"), granularity, now - TimeDelta::days(3), now)
                .await
                .unwrap();
            assert_eq!(buckets.len(), 1, "{granularity}");
            assert_eq!(buckets[0].median_temperature, 21.0);
        }
    }
}
