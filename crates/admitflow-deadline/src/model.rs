//! Deadline data model — the mutable record the store owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use admitflow_core::error::{AdmitflowError, Result};

use crate::rules::{DeadlineKind, TriggerEvent};

/// Deadline lifecycle status. Transitions are monotonic and absorbing:
/// ACTIVE → {COMPLETED, EXPIRED, CANCELLED}; nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineStatus {
    Active,
    Completed,
    Expired,
    Cancelled,
}

impl DeadlineStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeadlineStatus::Active)
    }
}

impl std::fmt::Display for DeadlineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeadlineStatus::Active => write!(f, "active"),
            DeadlineStatus::Completed => write!(f, "completed"),
            DeadlineStatus::Expired => write!(f, "expired"),
            DeadlineStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for DeadlineStatus {
    type Err = AdmitflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(DeadlineStatus::Active),
            "completed" => Ok(DeadlineStatus::Completed),
            "expired" => Ok(DeadlineStatus::Expired),
            "cancelled" => Ok(DeadlineStatus::Cancelled),
            other => Err(AdmitflowError::Validation(format!(
                "unknown deadline status '{other}'"
            ))),
        }
    }
}

/// A concrete time-bound obligation for one application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deadline {
    /// Store-assigned id.
    pub id: String,
    pub application_id: String,
    pub kind: DeadlineKind,
    pub description: String,
    pub due_date: DateTime<Utc>,
    /// Days-before-due ladder the reminder dates derive from, descending.
    /// Kept so extensions can recompute against a new due date.
    pub reminder_offsets_days: Vec<i64>,
    /// Concrete reminder timestamps, ascending, all strictly before due_date.
    pub reminder_dates: Vec<DateTime<Utc>>,
    /// Immutable after creation. Hard deadlines escalate on expiry.
    pub is_hard: bool,
    pub status: DeadlineStatus,
    /// Set for automatically derived deadlines, None for manual ones.
    pub trigger_event: Option<TriggerEvent>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Indices into reminder_dates already dispatched — the at-most-once guard.
    pub fired_reminders: BTreeSet<usize>,
    pub extension_count: u32,
    pub metadata: serde_json::Value,
    /// Optimistic-concurrency token, bumped by the store on every update.
    pub version: u64,
}

impl Deadline {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.due_date
    }

    /// Reminder indices that have elapsed but not yet fired, ascending.
    /// A delayed sweep gets every missed reminder here, in order.
    pub fn pending_reminders(&self, now: DateTime<Utc>) -> Vec<usize> {
        self.reminder_dates
            .iter()
            .enumerate()
            .filter(|(i, date)| **date <= now && !self.fired_reminders.contains(i))
            .map(|(i, _)| i)
            .collect()
    }
}

/// A deadline before the store has assigned identity — what the factory
/// produces. Id and version exist only past the store boundary, which keeps
/// the factory pure.
#[derive(Debug, Clone)]
pub struct DeadlineDraft {
    pub application_id: String,
    pub kind: DeadlineKind,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub reminder_offsets_days: Vec<i64>,
    pub reminder_dates: Vec<DateTime<Utc>>,
    pub is_hard: bool,
    pub trigger_event: Option<TriggerEvent>,
    pub metadata: serde_json::Value,
}

impl DeadlineDraft {
    /// Promote to a full record. Called by store implementations on insert.
    pub fn into_deadline(self, id: String, now: DateTime<Utc>) -> Deadline {
        Deadline {
            id,
            application_id: self.application_id,
            kind: self.kind,
            description: self.description,
            due_date: self.due_date,
            reminder_offsets_days: self.reminder_offsets_days,
            reminder_dates: self.reminder_dates,
            is_hard: self.is_hard,
            status: DeadlineStatus::Active,
            trigger_event: self.trigger_event,
            created_at: now,
            completed_at: None,
            fired_reminders: BTreeSet::new(),
            extension_count: 0,
            metadata: self.metadata,
            version: 0,
        }
    }
}
