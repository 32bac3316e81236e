//! Outbound collaborators: email notifications and real-time fan-out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::NotifyError;
use crate::models::Reading;

mod email;
mod fanout;

pub use email::{LogNotifier, SmtpNotifier};
pub use fanout::BroadcastFanout;

// ---

#[async_trait]
pub trait NotificationSink: Send + Sync {
    // ---
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError>;

    /// Sink name used in logs.
    fn name(&self) -> &str;
}

/// Live update pushed to currently subscribed observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingUpdate {
    pub device_id: String,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Reading> for ReadingUpdate {
    fn from(reading: &Reading) -> Self {
        Self {
            device_id: reading.device_id.clone(),
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: reading.received_at,
        }
    }
}

/// Best-effort broadcast; observers not subscribed at send time miss it.
pub trait FanoutSink: Send + Sync {
    fn broadcast(&self, update: ReadingUpdate);
}
