//! Threshold rule evaluation for accepted readings.
//!
//! Every enabled rule of the reading's device passes through the schedule
//! gates, the threshold check and the throttle claim. Firing claims the
//! rule's cooldown first and then hands the notification to the sink, so a
//! failing sink never causes repeated sends.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use tracing::{debug, error, info};

use crate::models::{AlertRule, MetricKind, Reading};
use crate::sinks::NotificationSink;
use crate::store::RuleStore;

pub mod schedule;

// ---

const COOLDOWN_SECS: i64 = 3600;

/// Minimum interval between successive notifications of one rule.
pub fn cooldown() -> TimeDelta {
    TimeDelta::seconds(COOLDOWN_SECS)
}

pub struct AlertEvaluator {
    rules: Arc<dyn RuleStore>,
    notifier: Arc<dyn NotificationSink>,
    offset: FixedOffset,
}

impl AlertEvaluator {
    // ---
    pub fn new(rules: Arc<dyn RuleStore>, notifier: Arc<dyn NotificationSink>, offset: FixedOffset) -> Self {
        Self { rules, notifier, offset }
    }

    /// Evaluate every enabled rule of the reading's device at `now`.
    ///
    /// Returns the number of rules that fired. Only rule loading can fail;
    /// notification and claim errors are logged per rule.
    pub async fn evaluate(&self, reading: &Reading, now: DateTime<Utc>) -> Result<usize, sqlx::Error> {
        // ---
        let rules = self.rules.enabled_rules_for_device(&reading.device_id).await?;
        let local = now.with_timezone(&self.offset);

        let mut fired = 0;
        for rule in &rules {
            if !schedule::schedule_allows(&rule.schedule, local) {
                debug!(rule_id = %rule.id, "Rule outside its schedule");
                continue;
            }

            let Some(value) = rule.metric.value_of(reading) else {
                continue;
            };
            if !rule.is_breached_by(value) {
                continue;
            }

            match self.rules.try_claim_trigger(rule.id, now, cooldown()).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(rule_id = %rule.id, "Rule throttled");
                    continue;
                }
                Err(e) => {
                    error!(rule_id = %rule.id, error = %e, "Failed to claim rule trigger");
                    continue;
                }
            }

            fired += 1;
            self.notify(rule, value, now).await;
        }

        Ok(fired)
    }

    async fn notify(&self, rule: &AlertRule, value: f64, now: DateTime<Utc>) {
        // ---
        let (subject, body) = render_notification(rule, value, now.with_timezone(&self.offset));
        match self.notifier.send(&rule.recipients, &subject, &body).await {
            Ok(()) => info!(
                rule_id = %rule.id,
                device_id = %rule.device_id,
                metric = %rule.metric,
                value,
                sink = self.notifier.name(),
                "Alert notification sent"
            ),
            Err(e) => error!(
                rule_id = %rule.id,
                device_id = %rule.device_id,
                sink = self.notifier.name(),
                error = %e,
                "Alert notification failed"
            ),
        }
    }
}

fn render_threshold(threshold: Option<f64>) -> String {
    threshold.map_or_else(|| "not set".to_string(), |t| format!("{t:.2}"))
}

/// Subject and plain-text body for a fired rule.
pub fn render_notification(rule: &AlertRule, value: f64, at: DateTime<FixedOffset>) -> (String, String) {
    // ---
    let metric = match rule.metric {
        MetricKind::Temperature => "Temperature",
        MetricKind::Humidity => "Humidity",
    };
    let subject = format!("[HeatSync] {metric} alert for device {}", rule.device_id);
    let body = format!(
        "Device {device} reported {metric_lc} {value:.2}.\n\n\
         Minimum threshold: {min}\n\
         Maximum threshold: {max}\n\
         Time: {at}\n\n\
         Further alerts for this rule are suppressed for {cooldown} minutes.\n",
        device = rule.device_id,
        metric_lc = rule.metric,
        min = render_threshold(rule.min_threshold),
        max = render_threshold(rule.max_threshold),
        at = at.format("%Y-%m-%d %H:%M:%S %:z"),
        cooldown = COOLDOWN_SECS / 60,
    );
    (subject, body)
}
