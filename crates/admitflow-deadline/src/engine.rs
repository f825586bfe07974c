//! Engine facade — the synchronous API surface the surrounding module calls.
//!
//! All mutations go through the store's compare-and-set. Where a caller races
//! the sweep (complete vs. expire), the first writer to observe ACTIVE wins
//! and the caller gets the final state back rather than an error.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use admitflow_core::error::{AdmitflowError, Result};

use crate::factory;
use crate::model::{Deadline, DeadlineDraft, DeadlineStatus};
use crate::pipeline::ApplicationLookup;
use crate::rules::{DeadlineKind, RuleCatalog, TriggerEvent};
use crate::stats::{StatisticsAggregator, StatsSnapshot};
use crate::store::{DeadlineStore, UpdateOutcome};
use crate::sweep::{SweepConfig, SweepScheduler};
use crate::trigger::TriggerProcessor;
use crate::escalation::ExpirationHandler;
use crate::notify::NotificationPort;

/// The deadline engine's front door.
pub struct DeadlineEngine {
    store: Arc<dyn DeadlineStore>,
    applications: Arc<dyn ApplicationLookup>,
    notifier: Arc<dyn NotificationPort>,
    expiration: Arc<ExpirationHandler>,
    trigger: TriggerProcessor,
    stats: StatisticsAggregator,
}

impl DeadlineEngine {
    pub fn new(
        store: Arc<dyn DeadlineStore>,
        catalog: Arc<RuleCatalog>,
        applications: Arc<dyn ApplicationLookup>,
        notifier: Arc<dyn NotificationPort>,
        expiration: Arc<ExpirationHandler>,
    ) -> Self {
        Self {
            trigger: TriggerProcessor::new(catalog, store.clone(), applications.clone()),
            stats: StatisticsAggregator::new(store.clone()),
            store,
            applications,
            notifier,
            expiration,
        }
    }

    /// Build the sweep loop sharing this engine's collaborators.
    pub fn sweeper(&self, config: SweepConfig) -> SweepScheduler {
        SweepScheduler::new(
            self.store.clone(),
            self.applications.clone(),
            self.notifier.clone(),
            self.expiration.clone(),
            config,
        )
    }

    /// Create a manual deadline with the stock reminder ladder.
    pub async fn create_deadline(
        &self,
        application_id: &str,
        kind: DeadlineKind,
        due_date: DateTime<Utc>,
        description: Option<String>,
        is_hard: bool,
        metadata: Option<serde_json::Value>,
    ) -> Result<Deadline> {
        self.applications
            .get(application_id)
            .await?
            .ok_or_else(|| {
                AdmitflowError::Validation(format!("unknown application '{application_id}'"))
            })?;
        let now = Utc::now();
        if due_date <= now {
            return Err(AdmitflowError::Validation(format!(
                "due date {due_date} is not in the future"
            )));
        }

        let offsets = factory::DEFAULT_MANUAL_REMINDER_OFFSETS.to_vec();
        let draft = DeadlineDraft {
            application_id: application_id.to_string(),
            kind,
            description: description.unwrap_or_else(|| kind.default_description().to_string()),
            due_date,
            reminder_dates: factory::reminder_dates(&offsets, due_date, Some(now)),
            reminder_offsets_days: offsets,
            is_hard,
            trigger_event: None,
            metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
        };
        self.store.insert(draft).await
    }

    /// Derive deadlines from a pipeline event.
    pub async fn on_trigger_event(
        &self,
        application_id: &str,
        event: TriggerEvent,
    ) -> Result<Vec<Deadline>> {
        self.trigger.on_event(application_id, event).await
    }

    /// Mark a deadline done. Terminal deadlines are rejected; losing the race
    /// against the sweep returns the settled row instead.
    pub async fn complete_deadline(&self, id: &str) -> Result<Deadline> {
        let mut deadline = self.fetch(id).await?;
        if deadline.status.is_terminal() {
            return Err(AdmitflowError::Validation(format!(
                "deadline '{id}' is already {}",
                deadline.status
            )));
        }

        deadline.status = DeadlineStatus::Completed;
        deadline.completed_at = Some(Utc::now());
        match self.store.update(&deadline).await? {
            UpdateOutcome::Applied(updated) => {
                tracing::info!("✅ Deadline completed: {} {}", updated.id, updated.kind);
                Ok(updated)
            }
            UpdateOutcome::Conflict => self.fetch(id).await,
        }
    }

    /// Move the due date forward, recomputing the reminder ladder. The new
    /// ladder starts fresh: recomputed dates already past are settled and
    /// never fire retroactively; future ones are eligible (again).
    pub async fn extend_deadline(
        &self,
        id: &str,
        new_due_date: DateTime<Utc>,
        reason: &str,
    ) -> Result<Deadline> {
        let mut deadline = self.fetch(id).await?;
        if deadline.status.is_terminal() {
            return Err(AdmitflowError::Validation(format!(
                "deadline '{id}' is already {}",
                deadline.status
            )));
        }
        if new_due_date <= deadline.due_date {
            return Err(AdmitflowError::Validation(format!(
                "extension must move the due date forward (current {}, requested {})",
                deadline.due_date, new_due_date
            )));
        }

        let now = Utc::now();
        deadline.due_date = new_due_date;
        deadline.reminder_dates =
            factory::reminder_dates(&deadline.reminder_offsets_days, new_due_date, None);
        // Old fired indices point into the old ladder, so they carry no
        // meaning here. Rebuild from the new dates: everything already past
        // is settled, everything in the future is eligible.
        deadline.fired_reminders = deadline
            .reminder_dates
            .iter()
            .enumerate()
            .filter(|(_, date)| **date <= now)
            .map(|(i, _)| i)
            .collect();
        deadline.extension_count += 1;
        record_extension(&mut deadline.metadata, now, new_due_date, reason);

        match self.store.update(&deadline).await? {
            UpdateOutcome::Applied(updated) => {
                tracing::info!(
                    "📆 Deadline extended: {} now due {} ({reason})",
                    updated.id,
                    updated.due_date.format("%Y-%m-%d")
                );
                Ok(updated)
            }
            UpdateOutcome::Conflict => Err(AdmitflowError::Conflict(format!(
                "deadline '{id}' changed concurrently; re-fetch and retry"
            ))),
        }
    }

    /// Manually cancel. Like complete, a lost race yields the final state.
    pub async fn cancel_deadline(&self, id: &str, reason: &str) -> Result<Deadline> {
        let mut deadline = self.fetch(id).await?;
        if deadline.status.is_terminal() {
            return Err(AdmitflowError::Validation(format!(
                "deadline '{id}' is already {}",
                deadline.status
            )));
        }

        deadline.status = DeadlineStatus::Cancelled;
        if let serde_json::Value::Object(map) = &mut deadline.metadata {
            map.insert("cancel_reason".into(), serde_json::json!(reason));
        }
        match self.store.update(&deadline).await? {
            UpdateOutcome::Applied(updated) => {
                tracing::info!("🚫 Deadline cancelled: {} ({reason})", updated.id);
                Ok(updated)
            }
            UpdateOutcome::Conflict => self.fetch(id).await,
        }
    }

    pub async fn list_deadlines(&self, application_id: &str) -> Result<Vec<Deadline>> {
        self.store.list_by_application(application_id).await
    }

    pub async fn statistics(&self) -> Result<StatsSnapshot> {
        self.stats.summarize().await
    }

    async fn fetch(&self, id: &str) -> Result<Deadline> {
        self.store.get(id).await?.ok_or_else(|| {
            AdmitflowError::Validation(format!("unknown deadline '{id}'"))
        })
    }
}

fn record_extension(
    metadata: &mut serde_json::Value,
    at: DateTime<Utc>,
    new_due: DateTime<Utc>,
    reason: &str,
) {
    let entry = serde_json::json!({
        "at": at.to_rfc3339(),
        "new_due_date": new_due.to_rfc3339(),
        "reason": reason,
    });
    if !metadata.is_object() {
        *metadata = serde_json::json!({});
    }
    if let serde_json::Value::Object(map) = metadata {
        match map.get_mut("extensions") {
            Some(serde_json::Value::Array(list)) => list.push(entry),
            _ => {
                map.insert("extensions".into(), serde_json::json!([entry]));
            }
        }
    }
}
