//! Expiration handling — soft deadlines notify only; hard deadlines run the
//! escalation action registered for their kind.
//!
//! Actions live in a lookup table, not a branch chain: new hard kinds plug in
//! without touching the sweep.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use admitflow_core::error::Result;

use crate::model::Deadline;
use crate::notify::{DeadlineNotice, NotificationPort};
use crate::pipeline::{ApplicationRecord, PipelinePort};
use crate::rules::DeadlineKind;

/// An irreversible action taken when a hard deadline expires.
#[async_trait]
pub trait EscalationAction: Send + Sync {
    fn name(&self) -> &str;
    async fn run(
        &self,
        deadline: &Deadline,
        application: Option<&ApplicationRecord>,
    ) -> Result<()>;
}

/// Close the pipeline stage as lapsed — document-submission expiry.
pub struct CloseStageAction {
    pipeline: Arc<dyn PipelinePort>,
}

#[async_trait]
impl EscalationAction for CloseStageAction {
    fn name(&self) -> &str {
        "close_stage_lapsed"
    }

    async fn run(&self, deadline: &Deadline, _app: Option<&ApplicationRecord>) -> Result<()> {
        self.pipeline
            .close_stage_lapsed(&deadline.application_id, deadline.kind)
            .await
    }
}

/// Revoke the pending offer — enrollment-confirmation expiry.
pub struct RevokeOfferAction {
    pipeline: Arc<dyn PipelinePort>,
}

#[async_trait]
impl EscalationAction for RevokeOfferAction {
    fn name(&self) -> &str {
        "revoke_offer"
    }

    async fn run(&self, deadline: &Deadline, _app: Option<&ApplicationRecord>) -> Result<()> {
        self.pipeline.revoke_offer(&deadline.application_id).await
    }
}

/// Cancel enrollment — deposit expiry.
pub struct CancelEnrollmentAction {
    pipeline: Arc<dyn PipelinePort>,
}

#[async_trait]
impl EscalationAction for CancelEnrollmentAction {
    fn name(&self) -> &str {
        "cancel_enrollment"
    }

    async fn run(&self, deadline: &Deadline, _app: Option<&ApplicationRecord>) -> Result<()> {
        self.pipeline
            .cancel_enrollment(&deadline.application_id)
            .await
    }
}

/// Kind → action table.
#[derive(Default)]
pub struct EscalationRegistry {
    actions: HashMap<DeadlineKind, Arc<dyn EscalationAction>>,
}

impl EscalationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock mapping, driving the given pipeline port.
    pub fn with_defaults(pipeline: Arc<dyn PipelinePort>) -> Self {
        let mut registry = Self::new();
        registry.register(
            DeadlineKind::DocumentSubmission,
            Arc::new(CloseStageAction {
                pipeline: pipeline.clone(),
            }),
        );
        registry.register(
            DeadlineKind::EnrollmentConfirmation,
            Arc::new(RevokeOfferAction {
                pipeline: pipeline.clone(),
            }),
        );
        registry.register(
            DeadlineKind::Deposit,
            Arc::new(CancelEnrollmentAction { pipeline }),
        );
        registry
    }

    pub fn register(&mut self, kind: DeadlineKind, action: Arc<dyn EscalationAction>) {
        self.actions.insert(kind, action);
    }

    pub fn get(&self, kind: DeadlineKind) -> Option<&Arc<dyn EscalationAction>> {
        self.actions.get(&kind)
    }
}

/// Runs the expiry side effects for a deadline the sweep has already claimed
/// (CAS to EXPIRED won). Never fails the sweep: dispatch and escalation
/// problems are logs, and the EXPIRED transition stands regardless.
pub struct ExpirationHandler {
    registry: EscalationRegistry,
    notifier: Arc<dyn NotificationPort>,
}

impl ExpirationHandler {
    pub fn new(registry: EscalationRegistry, notifier: Arc<dyn NotificationPort>) -> Self {
        Self { registry, notifier }
    }

    pub async fn handle(&self, deadline: &Deadline, application: Option<&ApplicationRecord>) {
        // Every expiry notifies, hard or soft
        let notice = DeadlineNotice::expired(deadline);
        if let Err(e) = self.notifier.send(&notice).await {
            tracing::warn!(
                "📭 Expiry notice for {} failed: {e}",
                deadline.id
            );
        }

        if !deadline.is_hard {
            return;
        }

        match self.registry.get(deadline.kind) {
            Some(action) => match action.run(deadline, application).await {
                Ok(()) => tracing::info!(
                    "⚡ Escalation '{}' ran for {} ({})",
                    action.name(),
                    deadline.id,
                    deadline.kind
                ),
                Err(e) => tracing::warn!(
                    "⚠️ Escalation '{}' failed for {}: {e}",
                    action.name(),
                    deadline.id
                ),
            },
            None => tracing::warn!(
                "⚠️ No escalation registered for hard deadline kind '{}' ({}) — needs manual follow-up",
                deadline.kind,
                deadline.id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeadlineDraft;
    use crate::notify::RecordingNotifier;
    use crate::pipeline::RecordingPipeline;
    use crate::rules::TriggerEvent;
    use chrono::{Duration, Utc};

    fn expired_deadline(kind: DeadlineKind, is_hard: bool) -> Deadline {
        let due = Utc::now() - Duration::days(1);
        DeadlineDraft {
            application_id: "app-1".into(),
            kind,
            description: kind.default_description().into(),
            due_date: due,
            reminder_offsets_days: vec![],
            reminder_dates: vec![],
            is_hard,
            trigger_event: Some(TriggerEvent::EnrollmentConfirmed),
            metadata: serde_json::json!({}),
        }
        .into_deadline("dl-exp".into(), due - Duration::days(20))
    }

    #[tokio::test]
    async fn test_hard_deposit_runs_cancel_enrollment() {
        let pipeline = Arc::new(RecordingPipeline::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let handler = ExpirationHandler::new(
            EscalationRegistry::with_defaults(pipeline.clone()),
            notifier.clone(),
        );

        handler
            .handle(&expired_deadline(DeadlineKind::Deposit, true), None)
            .await;

        assert_eq!(notifier.sent_count(), 1);
        assert_eq!(pipeline.commands(), vec!["cancel_enrollment:app-1"]);
    }

    #[tokio::test]
    async fn test_soft_deadline_never_escalates() {
        let pipeline = Arc::new(RecordingPipeline::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let handler = ExpirationHandler::new(
            EscalationRegistry::with_defaults(pipeline.clone()),
            notifier.clone(),
        );

        handler
            .handle(&expired_deadline(DeadlineKind::DocumentSubmission, false), None)
            .await;

        assert_eq!(notifier.sent_count(), 1);
        assert!(pipeline.commands().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_hard_kind_still_notifies() {
        let pipeline = Arc::new(RecordingPipeline::new());
        let notifier = Arc::new(RecordingNotifier::new());
        // Empty registry: the hard kind has no action, only a warn log
        let handler = ExpirationHandler::new(EscalationRegistry::new(), notifier.clone());

        handler
            .handle(&expired_deadline(DeadlineKind::Deposit, true), None)
            .await;

        assert_eq!(notifier.sent_count(), 1);
        assert!(pipeline.commands().is_empty());
    }

    #[tokio::test]
    async fn test_failed_notice_does_not_block_escalation() {
        let pipeline = Arc::new(RecordingPipeline::new());
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.set_failing(true);
        let handler = ExpirationHandler::new(
            EscalationRegistry::with_defaults(pipeline.clone()),
            notifier.clone(),
        );

        handler
            .handle(&expired_deadline(DeadlineKind::EnrollmentConfirmation, true), None)
            .await;

        assert_eq!(pipeline.commands(), vec!["revoke_offer:app-1"]);
    }
}
