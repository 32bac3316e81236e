//! Multi-resolution median aggregation.
//!
//! [`compute_buckets`] is a pure function of a granularity and a reading set.
//! [`Aggregator::run`] applies it to one window of the store and replaces the
//! window's buckets per device. Timers live in [`scheduler`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::AggregationError;
use crate::models::{AggregateBucket, Granularity, Reading};
use crate::store::{BucketStore, ReadingStore};

pub mod scheduler;

// ---

/// Median of `values`; the mean of the two middle values for even counts.
pub fn median(values: &mut [f64]) -> Option<f64> {
    // ---
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// One bucket per non-empty (device, bucket start), ordered by device then start.
pub fn compute_buckets(granularity: Granularity, readings: &[Reading]) -> Vec<AggregateBucket> {
    // ---
    let mut grouped: BTreeMap<(&str, DateTime<Utc>), Vec<f64>> = BTreeMap::new();
    for reading in readings {
        grouped
            .entry((reading.device_id.as_str(), granularity.bucket_start(reading.received_at)))
            .or_default()
            .push(reading.temperature);
    }

    grouped
        .into_iter()
        .filter_map(|((device_id, bucket_start), mut temps)| {
            median(&mut temps).map(|median_temperature| AggregateBucket {
                device_id: device_id.to_string(),
                granularity,
                bucket_start,
                median_temperature,
            })
        })
        .collect()
}

/// Outcome of one successful aggregation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub devices: usize,
    pub buckets: usize,
}

pub struct Aggregator {
    readings: Arc<dyn ReadingStore>,
    buckets: Arc<dyn BucketStore>,
}

impl Aggregator {
    // ---
    pub fn new(readings: Arc<dyn ReadingStore>, buckets: Arc<dyn BucketStore>) -> Self {
        Self { readings, buckets }
    }

    /// Recompute `granularity` buckets for `[from, to)`.
    ///
    /// `from` is first floored to its bucket boundary so the leading bucket is
    /// computed from its complete reading set. Replacement is atomic per
    /// device; a failure aborts the remainder of the run.
    pub async fn run(
        &self,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RunSummary, AggregationError> {
        // ---
        let from = granularity.bucket_start(from);
        let fail = |source| AggregationError { granularity, from, to, source };

        let readings = self.readings.in_range(from, to).await.map_err(fail)?;
        let computed = compute_buckets(granularity, &readings);

        let mut per_device: BTreeMap<&str, Vec<AggregateBucket>> = BTreeMap::new();
        for bucket in &computed {
            per_device
                .entry(bucket.device_id.as_str())
                .or_default()
                .push(bucket.clone());
        }

        for (device_id, device_buckets) in &per_device {
            self.buckets
                .replace_window(device_id, granularity, from, to, device_buckets)
                .await
                .map_err(fail)?;
            debug!(
                device_id = %device_id,
                granularity = %granularity,
                buckets = device_buckets.len(),
                "Replaced aggregate window"
            );
        }

        let summary = RunSummary {
            devices: per_device.len(),
            buckets: computed.len(),
        };
        info!(
            granularity = %granularity,
            %from,
            %to,
            readings = readings.len(),
            devices = summary.devices,
            buckets = summary.buckets,
            "Aggregation run complete"
        );
        Ok(summary)
    }
}
