//! Notification port — the only outbound channel the engine talks through.
//!
//! Delivery failures are ordinary results, never panics: the sweep logs them
//! and retries next cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use admitflow_core::error::{AdmitflowError, Result};

use crate::model::Deadline;

/// What a notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// An upcoming-deadline reminder; `index` is the reminder's position in
    /// the deadline's ladder.
    Reminder { index: usize },
    /// The deadline passed without completion.
    Expired,
}

/// A message bound for the applicant, whatever the concrete channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineNotice {
    pub application_id: String,
    pub deadline_id: String,
    pub kind: NoticeKind,
    pub description: String,
    pub due_date: DateTime<Utc>,
}

impl DeadlineNotice {
    pub fn reminder(deadline: &Deadline, index: usize) -> Self {
        Self {
            application_id: deadline.application_id.clone(),
            deadline_id: deadline.id.clone(),
            kind: NoticeKind::Reminder { index },
            description: deadline.description.clone(),
            due_date: deadline.due_date,
        }
    }

    pub fn expired(deadline: &Deadline) -> Self {
        Self {
            application_id: deadline.application_id.clone(),
            deadline_id: deadline.id.clone(),
            kind: NoticeKind::Expired,
            description: deadline.description.clone(),
            due_date: deadline.due_date,
        }
    }

    /// Templated copy. All timestamps are UTC by design.
    pub fn render(&self) -> String {
        let due = self.due_date.format("%Y-%m-%d %H:%M UTC");
        match self.kind {
            NoticeKind::Reminder { .. } => {
                format!("Reminder: \"{}\" is due {}", self.description, due)
            }
            NoticeKind::Expired => {
                format!("Deadline missed: \"{}\" was due {}", self.description, due)
            }
        }
    }
}

/// The narrow outbound port. Implementations own channel details.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn send(&self, notice: &DeadlineNotice) -> Result<()>;
}

/// Log-only delivery — the default when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl NotificationPort for LogNotifier {
    async fn send(&self, notice: &DeadlineNotice) -> Result<()> {
        tracing::info!(
            "📣 [{}] {}",
            notice.application_id,
            notice.render()
        );
        Ok(())
    }
}

/// Records every notice instead of sending — test double, also handy for
/// embedding hosts that collect notices themselves.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<DeadlineNotice>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every send fails until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<DeadlineNotice> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn send(&self, notice: &DeadlineNotice) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdmitflowError::Dispatch("channel unavailable".into()));
        }
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_copy() {
        let notice = DeadlineNotice {
            application_id: "app-1".into(),
            deadline_id: "dl-1".into(),
            kind: NoticeKind::Reminder { index: 0 },
            description: "Pay the enrollment deposit".into(),
            due_date: Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
        };
        assert_eq!(
            notice.render(),
            "Reminder: \"Pay the enrollment deposit\" is due 2024-01-31 00:00 UTC"
        );
    }

    #[tokio::test]
    async fn test_recording_notifier_failure_toggle() {
        let notifier = RecordingNotifier::new();
        let notice = DeadlineNotice {
            application_id: "app-1".into(),
            deadline_id: "dl-1".into(),
            kind: NoticeKind::Expired,
            description: "docs".into(),
            due_date: Utc::now(),
        };

        notifier.set_failing(true);
        assert!(notifier.send(&notice).await.is_err());
        assert_eq!(notifier.sent_count(), 0);

        notifier.set_failing(false);
        notifier.send(&notice).await.unwrap();
        assert_eq!(notifier.sent_count(), 1);
    }
}
