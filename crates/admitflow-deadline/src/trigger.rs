//! Trigger processor — materializes deadlines from pipeline events.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use admitflow_core::error::{AdmitflowError, Result};

use crate::factory;
use crate::model::Deadline;
use crate::pipeline::ApplicationLookup;
use crate::rules::{RuleCatalog, TriggerEvent};
use crate::store::{CreateOutcome, DeadlineStore};

/// Turns pipeline events into persisted deadlines via the rule catalog.
/// Re-processing an event is safe: create-if-absent at the store guarantees
/// at most one ACTIVE deadline per (application, kind, trigger event).
pub struct TriggerProcessor {
    catalog: Arc<RuleCatalog>,
    store: Arc<dyn DeadlineStore>,
    applications: Arc<dyn ApplicationLookup>,
}

impl TriggerProcessor {
    pub fn new(
        catalog: Arc<RuleCatalog>,
        store: Arc<dyn DeadlineStore>,
        applications: Arc<dyn ApplicationLookup>,
    ) -> Self {
        Self {
            catalog,
            store,
            applications,
        }
    }

    /// Process an event observed now.
    pub async fn on_event(
        &self,
        application_id: &str,
        event: TriggerEvent,
    ) -> Result<Vec<Deadline>> {
        self.on_event_at(application_id, event, Utc::now()).await
    }

    /// Process an event with an explicit trigger timestamp (late delivery,
    /// tests). Reminder dates already in the past are not materialized.
    pub async fn on_event_at(
        &self,
        application_id: &str,
        event: TriggerEvent,
        trigger_ts: DateTime<Utc>,
    ) -> Result<Vec<Deadline>> {
        let application = self
            .applications
            .get(application_id)
            .await?
            .ok_or_else(|| {
                AdmitflowError::Validation(format!("unknown application '{application_id}'"))
            })?;

        if !application.status.in_active_pipeline() {
            tracing::debug!(
                "Event {event} for {application_id} ignored: application is {:?}",
                application.status
            );
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut deadlines = Vec::new();
        for rule in self.catalog.rules_for(event) {
            if !rule.is_automatic {
                continue;
            }
            let draft = factory::materialize(rule, application_id, trigger_ts, now);
            match self.store.create_if_absent(draft).await? {
                CreateOutcome::Created(deadline) => {
                    tracing::info!(
                        "📅 Deadline created: {} {} due {} ({})",
                        deadline.id,
                        deadline.kind,
                        deadline.due_date.format("%Y-%m-%d"),
                        if deadline.is_hard { "hard" } else { "soft" }
                    );
                    deadlines.push(deadline);
                }
                CreateOutcome::AlreadyActive(existing) => {
                    tracing::debug!(
                        "Event {event} for {application_id} already has active {} deadline {}",
                        existing.kind,
                        existing.id
                    );
                    deadlines.push(existing);
                }
            }
        }
        Ok(deadlines)
    }
}
