//! Deadline factory — pure derivation from a rule and a trigger timestamp.
//!
//! No ids, no clocks of its own, no I/O: callers pass `now`, the store
//! assigns identity on insert.

use chrono::{DateTime, Duration, Utc};

use crate::model::DeadlineDraft;
use crate::rules::DeadlineRule;

/// Reminder ladder for manually created deadlines (days before due).
pub const DEFAULT_MANUAL_REMINDER_OFFSETS: [i64; 3] = [7, 3, 1];

/// Build a draft from a rule and the trigger timestamp.
///
/// due_date = trigger + offset_days; reminder dates derive from the rule's
/// offset ladder with anything at or before `now` dropped — late processing
/// never produces retroactive reminders.
pub fn materialize(
    rule: &DeadlineRule,
    application_id: &str,
    trigger_ts: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DeadlineDraft {
    let due_date = trigger_ts + Duration::days(rule.offset_days);
    DeadlineDraft {
        application_id: application_id.to_string(),
        kind: rule.kind,
        description: rule.kind.default_description().to_string(),
        due_date,
        reminder_offsets_days: rule.reminder_offsets_days.clone(),
        reminder_dates: reminder_dates(&rule.reminder_offsets_days, due_date, Some(now)),
        is_hard: rule.is_hard,
        trigger_event: Some(rule.trigger_event),
        metadata: serde_json::json!({}),
    }
}

/// Concrete reminder timestamps for an offset ladder: deduplicated, ascending,
/// all strictly before the due date. When `now` is given, dates at or before
/// it are dropped.
pub fn reminder_dates(
    offsets_days: &[i64],
    due_date: DateTime<Utc>,
    now: Option<DateTime<Utc>>,
) -> Vec<DateTime<Utc>> {
    let mut dates: Vec<DateTime<Utc>> = offsets_days
        .iter()
        .map(|o| due_date - Duration::days(*o))
        .collect();
    dates.sort_unstable();
    dates.dedup();
    dates.retain(|d| *d < due_date);
    if let Some(now) = now {
        dates.retain(|d| *d > now);
    }
    dates
}
