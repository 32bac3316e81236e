//! Data models for the telemetry core: readings, buckets and alert rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IngestError, RuleError};

// ---

/// Advisory timestamps below this are taken to be epoch seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Inbound telemetry payload as published by sensor nodes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    // ---
    pub device_id: String,
    pub temperature: f64,
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Device clock, epoch milliseconds. Advisory only.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl TelemetryMessage {
    // ---
    pub fn parse(payload: &[u8]) -> Result<Self, IngestError> {
        serde_json::from_slice(payload).map_err(|e| IngestError::Malformed(e.to_string()))
    }

    /// Stamp the message with the server receipt time.
    pub fn into_new_reading(self, received_at: DateTime<Utc>) -> Result<NewReading, IngestError> {
        // ---
        let device_id = self.device_id.trim().to_string();
        if device_id.is_empty() {
            return Err(IngestError::Malformed("empty deviceId".into()));
        }
        if !self.temperature.is_finite() {
            return Err(IngestError::Malformed("non-finite temperature".into()));
        }
        if self.humidity.is_some_and(|h| !h.is_finite()) {
            return Err(IngestError::Malformed("non-finite humidity".into()));
        }

        let device_time = self.timestamp.and_then(advisory_time);

        Ok(NewReading {
            device_id,
            temperature: self.temperature,
            humidity: self.humidity,
            received_at,
            device_time,
        })
    }
}

fn advisory_time(raw: f64) -> Option<DateTime<Utc>> {
    // ---
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let millis = if raw < EPOCH_MILLIS_THRESHOLD { raw * 1000.0 } else { raw };
    DateTime::from_timestamp_millis(millis as i64)
}

/// A reading accepted for evaluation but not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    // ---
    pub device_id: String,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub received_at: DateTime<Utc>,
    pub device_time: Option<DateTime<Utc>>,
}

/// A stored reading. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Reading {
    // ---
    pub id: i64,
    pub device_id: String,
    pub received_at: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub device_time: Option<DateTime<Utc>>,
}

// ---

/// Aggregation bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "1m")]
    Minute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "1d")]
    Day,
}

impl Granularity {
    // ---
    pub const ALL: [Granularity; 5] = [
        Granularity::Minute,
        Granularity::FiveMinutes,
        Granularity::Hour,
        Granularity::SixHours,
        Granularity::Day,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Minute => "1m",
            Granularity::FiveMinutes => "5m",
            Granularity::Hour => "1h",
            Granularity::SixHours => "6h",
            Granularity::Day => "1d",
        }
    }

    pub fn width(self) -> TimeDelta {
        match self {
            Granularity::Minute => TimeDelta::minutes(1),
            Granularity::FiveMinutes => TimeDelta::minutes(5),
            Granularity::Hour => TimeDelta::hours(1),
            Granularity::SixHours => TimeDelta::hours(6),
            Granularity::Day => TimeDelta::days(1),
        }
    }

    /// Start of the bucket containing `ts`.
    ///
    /// `5m` and `6h` floor to epoch multiples of their width; `1m`, `1h` and
    /// `1d` floor to UTC calendar boundaries.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        // ---
        match self {
            Granularity::FiveMinutes => floor_epoch(ts, 300),
            Granularity::SixHours => floor_epoch(ts, 21_600),
            Granularity::Minute => calendar_floor(ts, ts.hour(), ts.minute()),
            Granularity::Hour => calendar_floor(ts, ts.hour(), 0),
            Granularity::Day => calendar_floor(ts, 0, 0),
        }
    }
}

fn floor_epoch(ts: DateTime<Utc>, width_secs: i64) -> DateTime<Utc> {
    let secs = ts.timestamp().div_euclid(width_secs) * width_secs;
    DateTime::from_timestamp(secs, 0).unwrap_or(ts)
}

fn calendar_floor(ts: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(hour, minute, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(ts)
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownGranularity(pub String);

impl fmt::Display for UnknownGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown granularity {:?}, expected one of 1m,5m,1h,6h,1d", self.0)
    }
}

impl std::error::Error for UnknownGranularity {}

impl FromStr for Granularity {
    type Err = UnknownGranularity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Granularity::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| UnknownGranularity(s.to_string()))
    }
}

/// Median temperature of one device over one granularity-aligned interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateBucket {
    // ---
    pub device_id: String,
    pub granularity: Granularity,
    pub bucket_start: DateTime<Utc>,
    pub median_temperature: f64,
}

// ---

/// Which reading field a rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Temperature,
    Humidity,
}

impl MetricKind {
    // ---
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Temperature => "temperature",
            MetricKind::Humidity => "humidity",
        }
    }

    /// The matching value of a reading, if the reading carries it.
    pub fn value_of(self, reading: &Reading) -> Option<f64> {
        match self {
            MetricKind::Temperature => Some(reading.temperature),
            MetricKind::Humidity => reading.humidity,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(MetricKind::Temperature),
            "humidity" => Ok(MetricKind::Humidity),
            other => Err(RuleError::UnknownMetric(other.to_string())),
        }
    }
}

/// Optional restrictions on when a rule may fire, in local time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSchedule {
    // ---
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// 0 = Sunday .. 6 = Saturday. Empty means every day.
    pub weekdays: Vec<u8>,
}

/// A threshold rule for one device and metric.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    // ---
    pub id: Uuid,
    pub device_id: String,
    pub metric: MetricKind,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub schedule: RuleSchedule,
    pub recipients: Vec<String>,
    pub enabled: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl AlertRule {
    // ---
    pub fn validate(&self) -> Result<(), RuleError> {
        // ---
        match (self.min_threshold, self.max_threshold) {
            (None, None) => return Err(RuleError::NoThreshold),
            (Some(min), Some(max)) if min >= max => {
                return Err(RuleError::InvertedThresholds { min, max })
            }
            _ => {}
        }

        if self.recipients.is_empty() {
            return Err(RuleError::NoRecipients);
        }
        if let Some(bad) = self
            .recipients
            .iter()
            .find(|r| r.parse::<lettre::Address>().is_err())
        {
            return Err(RuleError::InvalidRecipient(bad.clone()));
        }

        if let Some(&day) = self.schedule.weekdays.iter().find(|&&d| d > 6) {
            return Err(RuleError::InvalidWeekday(i32::from(day)));
        }

        Ok(())
    }

    /// Whether `value` breaches the rule's thresholds. Bounds are exclusive.
    pub fn is_breached_by(&self, value: f64) -> bool {
        self.min_threshold.is_some_and(|min| value < min)
            || self.max_threshold.is_some_and(|max| value > max)
    }
}

/// Parse an `HH:MM` time of day.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, RuleError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| RuleError::InvalidTimeOfDay(raw.to_string()))
}

/// `alert_rules` row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRuleRow {
    // ---
    pub id: Uuid,
    pub device_id: String,
    pub metric: String,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub weekdays: Option<Vec<i32>>,
    pub emails: Vec<String>,
    pub enabled: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl TryFrom<AlertRuleRow> for AlertRule {
    type Error = RuleError;

    fn try_from(row: AlertRuleRow) -> Result<Self, Self::Error> {
        // ---
        let weekdays = row
            .weekdays
            .unwrap_or_default()
            .into_iter()
            .map(|d| u8::try_from(d).ok().filter(|d| *d <= 6).ok_or(RuleError::InvalidWeekday(d)))
            .collect::<Result<Vec<_>, _>>()?;

        let schedule = RuleSchedule {
            start_time: row.start_time.as_deref().map(parse_time_of_day).transpose()?,
            end_time: row.end_time.as_deref().map(parse_time_of_day).transpose()?,
            start_date: row.start_date,
            end_date: row.end_date,
            weekdays,
        };

        let rule = AlertRule {
            id: row.id,
            device_id: row.device_id,
            metric: row.metric.parse()?,
            min_threshold: row.min_threshold,
            max_threshold: row.max_threshold,
            schedule,
            recipients: row.emails,
            enabled: row.enabled,
            last_triggered_at: row.last_triggered_at,
        };
        rule.validate()?;
        Ok(rule)
    }
}
