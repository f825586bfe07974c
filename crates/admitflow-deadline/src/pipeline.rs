//! Application pipeline ports.
//!
//! The engine consumes the application record read-only and drives the
//! pipeline's irreversible commands only through [`PipelinePort`] — it never
//! owns application state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use admitflow_core::error::Result;

use crate::rules::DeadlineKind;

/// Where an application sits in the admissions pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Submitted,
    UnderReview,
    InterviewScheduled,
    OfferExtended,
    Enrolled,
    Withdrawn,
    Rejected,
}

impl ApplicationStatus {
    /// Deadlines only matter while the application is still moving through
    /// the pipeline; the sweep skips the rest.
    pub fn in_active_pipeline(&self) -> bool {
        !matches!(self, ApplicationStatus::Withdrawn | ApplicationStatus::Rejected)
    }
}

/// Read-only view of an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub application_id: String,
    pub status: ApplicationStatus,
    pub contact: String,
}

/// Read-side lookup consumed by the engine.
#[async_trait]
pub trait ApplicationLookup: Send + Sync {
    async fn get(&self, application_id: &str) -> Result<Option<ApplicationRecord>>;
}

/// The irreversible pipeline commands hard-deadline escalations invoke.
#[async_trait]
pub trait PipelinePort: Send + Sync {
    /// Close the current pipeline stage as lapsed.
    async fn close_stage_lapsed(&self, application_id: &str, kind: DeadlineKind) -> Result<()>;
    /// Revoke a pending offer.
    async fn revoke_offer(&self, application_id: &str) -> Result<()>;
    /// Cancel an enrollment in progress.
    async fn cancel_enrollment(&self, application_id: &str) -> Result<()>;
}

/// Fixed in-memory application table — demos and tests.
#[derive(Default)]
pub struct StaticApplications {
    records: HashMap<String, ApplicationRecord>,
}

impl StaticApplications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, application_id: &str, status: ApplicationStatus) -> Self {
        self.records.insert(
            application_id.to_string(),
            ApplicationRecord {
                application_id: application_id.to_string(),
                status,
                contact: format!("{application_id}@example.test"),
            },
        );
        self
    }
}

#[async_trait]
impl ApplicationLookup for StaticApplications {
    async fn get(&self, application_id: &str) -> Result<Option<ApplicationRecord>> {
        Ok(self.records.get(application_id).cloned())
    }
}

/// Logs each command instead of executing it — demo wiring.
pub struct LoggingPipeline;

#[async_trait]
impl PipelinePort for LoggingPipeline {
    async fn close_stage_lapsed(&self, application_id: &str, kind: DeadlineKind) -> Result<()> {
        tracing::info!("🛑 Stage closed as lapsed for {application_id} ({kind})");
        Ok(())
    }

    async fn revoke_offer(&self, application_id: &str) -> Result<()> {
        tracing::info!("🛑 Offer revoked for {application_id}");
        Ok(())
    }

    async fn cancel_enrollment(&self, application_id: &str) -> Result<()> {
        tracing::info!("🛑 Enrollment cancelled for {application_id}");
        Ok(())
    }
}

/// Records each command — test double for escalation paths.
#[derive(Default)]
pub struct RecordingPipeline {
    commands: Mutex<Vec<String>>,
}

impl RecordingPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelinePort for RecordingPipeline {
    async fn close_stage_lapsed(&self, application_id: &str, kind: DeadlineKind) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("close_stage_lapsed:{application_id}:{kind}"));
        Ok(())
    }

    async fn revoke_offer(&self, application_id: &str) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("revoke_offer:{application_id}"));
        Ok(())
    }

    async fn cancel_enrollment(&self, application_id: &str) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("cancel_enrollment:{application_id}"));
        Ok(())
    }
}
