//! Error taxonomy for the telemetry core.
//!
//! Startup and plumbing code uses `anyhow`; the types here are the failures
//! the pipeline distinguishes and logs differently.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::Granularity;

/// Failures of a single ingestion chain.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Payload could not be decoded; dropped, never retried.
    #[error("malformed telemetry message: {0}")]
    Malformed(String),

    /// Store unreachable; nothing was stored so alerting is skipped.
    #[error("failed to persist reading: {0}")]
    Persistence(#[from] sqlx::Error),
}

/// Rule definitions rejected by [`crate::models::AlertRule::validate`].
#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("rule must define a minimum or a maximum threshold")]
    NoThreshold,

    #[error("minimum threshold {min} must be below maximum {max}")]
    InvertedThresholds { min: f64, max: f64 },

    #[error("rule must have at least one recipient")]
    NoRecipients,

    #[error("invalid recipient address {0:?}")]
    InvalidRecipient(String),

    #[error("invalid time of day {0:?}, expected HH:MM")]
    InvalidTimeOfDay(String),

    #[error("weekday {0} out of range 0-6")]
    InvalidWeekday(i32),

    #[error("unknown metric kind {0:?}")]
    UnknownMetric(String),
}

/// Notification sink failure. Logged by the evaluator, never retried.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build notification: {0}")]
    Build(String),

    #[error("failed to deliver notification: {0}")]
    Transport(String),
}

/// A scheduled aggregation run that aborted as a whole.
#[derive(Debug, Error)]
#[error("aggregation run for {granularity} [{from}, {to}) failed: {source}")]
pub struct AggregationError {
    pub granularity: Granularity,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[source]
    pub source: sqlx::Error,
}
