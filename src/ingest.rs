//! One ingestion chain per inbound message:
//! change-gate → persist → touch device → evaluate alerts → fan out.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, trace, warn};

use crate::alerts::AlertEvaluator;
use crate::error::IngestError;
use crate::models::{NewReading, Reading, TelemetryMessage};
use crate::sinks::{FanoutSink, ReadingUpdate};
use crate::store::{DeviceRegistry, ReadingStore};

// ---

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Stored(Reading),
    /// Indistinguishable from the device's previous reading; dropped.
    Unchanged,
}

pub struct Ingestor {
    readings: Arc<dyn ReadingStore>,
    registry: Arc<dyn DeviceRegistry>,
    evaluator: AlertEvaluator,
    fanout: Arc<dyn FanoutSink>,
}

impl Ingestor {
    // ---
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        registry: Arc<dyn DeviceRegistry>,
        evaluator: AlertEvaluator,
        fanout: Arc<dyn FanoutSink>,
    ) -> Self {
        Self {
            readings,
            registry,
            evaluator,
            fanout,
        }
    }

    /// Decode a raw telemetry payload stamped with the current server time.
    pub async fn ingest_payload(&self, payload: &[u8]) -> Result<IngestOutcome, IngestError> {
        // ---
        let reading = TelemetryMessage::parse(payload)?.into_new_reading(Utc::now())?;
        self.ingest(reading).await
    }

    pub async fn ingest(&self, reading: NewReading) -> Result<IngestOutcome, IngestError> {
        // ---
        let Some(stored) = self.readings.append_if_changed(&reading).await? else {
            debug!(device_id = %reading.device_id, "Reading unchanged, dropped");
            return Ok(IngestOutcome::Unchanged);
        };
        debug!(device_id = %stored.device_id, id = stored.id, "Reading stored");

        if let Err(e) = self
            .registry
            .touch_last_seen(&stored.device_id, stored.received_at)
            .await
        {
            warn!(device_id = %stored.device_id, error = %e, "Failed to update device last seen");
        }

        // Alerting failures never fail ingestion.
        if let Err(e) = self.evaluator.evaluate(&stored, stored.received_at).await {
            error!(device_id = %stored.device_id, error = %e, "Alert evaluation failed");
        }

        self.fanout.broadcast(ReadingUpdate::from(&stored));

        Ok(IngestOutcome::Stored(stored))
    }

    /// Run a payload through the chain and log the outcome. No caller waits
    /// on ingestion, so failures end here.
    pub async fn handle_message(&self, payload: &[u8]) {
        // ---
        match self.ingest_payload(payload).await {
            Ok(IngestOutcome::Stored(reading)) => {
                trace!(device_id = %reading.device_id, id = reading.id, "Ingestion chain complete");
            }
            Ok(IngestOutcome::Unchanged) => {}
            Err(IngestError::Malformed(reason)) => {
                warn!(
                    reason = %reason,
                    payload = %String::from_utf8_lossy(payload),
                    "Dropping malformed telemetry message"
                );
            }
            Err(e @ IngestError::Persistence(_)) => {
                error!(error = %e, "Telemetry reading lost");
            }
        }
    }
}
