//! Schedule gates applied before a rule's threshold is checked.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Timelike};

use crate::models::RuleSchedule;

/// Whether `t` falls in the inclusive time-of-day window `[start, end]`.
///
/// When `start > end` the window wraps midnight and contains every time at
/// or after `start` together with every time at or before `end`.
pub fn time_window_contains(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> bool {
    if start <= end {
        start <= t && t <= end
    } else {
        t >= start || t <= end
    }
}

/// Evaluate the date, weekday and time-of-day gates in that order.
///
/// `local` is the evaluation instant in the rule time zone. Time of day is
/// compared at minute resolution, matching the `HH:MM` configuration.
pub fn schedule_allows(schedule: &RuleSchedule, local: DateTime<FixedOffset>) -> bool {
    // ---
    let today = local.date_naive();
    if schedule.start_date.is_some_and(|start| today < start) {
        return false;
    }
    if schedule.end_date.is_some_and(|end| today > end) {
        return false;
    }

    if !schedule.weekdays.is_empty() {
        let weekday = local.weekday().num_days_from_sunday() as u8;
        if !schedule.weekdays.contains(&weekday) {
            return false;
        }
    }

    if let (Some(start), Some(end)) = (schedule.start_time, schedule.end_time) {
        let now = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).unwrap_or(local.time());
        if !time_window_contains(start, end, now) {
            return false;
        }
    }

    true
}
