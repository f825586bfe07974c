//! Deadline store contract — durable CRUD with optimistic concurrency.
//!
//! The engine owns the contract; implementations live behind it. Two ship
//! here: an in-memory store for tests and embedding, and the SQLite store in
//! `persistence`. Conflicts are values, not errors — a lost compare-and-set
//! is an expected outcome the caller resolves by re-fetching.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use admitflow_core::error::{AdmitflowError, Result};

use crate::model::{Deadline, DeadlineDraft, DeadlineStatus};

/// Result of an idempotent create keyed on (application, kind, trigger event).
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(Deadline),
    /// An ACTIVE deadline with the same origin already exists.
    AlreadyActive(Deadline),
}

impl CreateOutcome {
    pub fn into_deadline(self) -> Deadline {
        match self {
            CreateOutcome::Created(d) | CreateOutcome::AlreadyActive(d) => d,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Result of a compare-and-set update.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The write won; carries the row with its bumped version.
    Applied(Deadline),
    /// Another writer got there first. Re-fetch to observe the final state.
    Conflict,
}

/// Durable deadline storage, keyed by id and by (application, status).
#[async_trait]
pub trait DeadlineStore: Send + Sync {
    /// Insert unconditionally. The store assigns the id.
    async fn insert(&self, draft: DeadlineDraft) -> Result<Deadline>;

    /// Atomic create-if-absent on (application_id, kind, trigger_event)
    /// among ACTIVE rows.
    async fn create_if_absent(&self, draft: DeadlineDraft) -> Result<CreateOutcome>;

    async fn get(&self, id: &str) -> Result<Option<Deadline>>;

    async fn list_by_application(&self, application_id: &str) -> Result<Vec<Deadline>>;

    async fn list_by_status(&self, status: DeadlineStatus) -> Result<Vec<Deadline>>;

    async fn scan_all(&self) -> Result<Vec<Deadline>>;

    /// Compare-and-set on `deadline.version`. The stored row is replaced and
    /// its version bumped only if the versions still match.
    async fn update(&self, deadline: &Deadline) -> Result<UpdateOutcome>;
}

fn new_id() -> String {
    format!("dl-{}", uuid::Uuid::new_v4())
}

/// In-memory store — tests, demos, and embedding without SQLite.
#[derive(Default)]
pub struct MemoryDeadlineStore {
    rows: Mutex<HashMap<String, Deadline>>,
}

impl MemoryDeadlineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadlineStore for MemoryDeadlineStore {
    async fn insert(&self, draft: DeadlineDraft) -> Result<Deadline> {
        let deadline = draft.into_deadline(new_id(), Utc::now());
        let mut rows = self.rows.lock().unwrap();
        rows.insert(deadline.id.clone(), deadline.clone());
        Ok(deadline)
    }

    async fn create_if_absent(&self, draft: DeadlineDraft) -> Result<CreateOutcome> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows.values().find(|d| {
            d.status == DeadlineStatus::Active
                && d.application_id == draft.application_id
                && d.kind == draft.kind
                && d.trigger_event == draft.trigger_event
        });
        if let Some(found) = existing {
            return Ok(CreateOutcome::AlreadyActive(found.clone()));
        }
        let deadline = draft.into_deadline(new_id(), Utc::now());
        rows.insert(deadline.id.clone(), deadline.clone());
        Ok(CreateOutcome::Created(deadline))
    }

    async fn get(&self, id: &str) -> Result<Option<Deadline>> {
        Ok(self.rows.lock().unwrap().get(id).cloned())
    }

    async fn list_by_application(&self, application_id: &str) -> Result<Vec<Deadline>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<Deadline> = rows
            .values()
            .filter(|d| d.application_id == application_id)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.created_at);
        Ok(out)
    }

    async fn list_by_status(&self, status: DeadlineStatus) -> Result<Vec<Deadline>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<Deadline> = rows
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.due_date);
        Ok(out)
    }

    async fn scan_all(&self) -> Result<Vec<Deadline>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn update(&self, deadline: &Deadline) -> Result<UpdateOutcome> {
        let mut rows = self.rows.lock().unwrap();
        let Some(stored) = rows.get_mut(&deadline.id) else {
            return Err(AdmitflowError::Store(format!(
                "unknown deadline id '{}'",
                deadline.id
            )));
        };
        if stored.version != deadline.version {
            return Ok(UpdateOutcome::Conflict);
        }
        let mut updated = deadline.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(UpdateOutcome::Applied(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DeadlineKind, TriggerEvent};
    use chrono::{Duration, Utc};

    fn draft(app: &str, trigger: Option<TriggerEvent>) -> DeadlineDraft {
        let due = Utc::now() + Duration::days(14);
        DeadlineDraft {
            application_id: app.into(),
            kind: DeadlineKind::EnrollmentConfirmation,
            description: "confirm".into(),
            due_date: due,
            reminder_offsets_days: vec![7, 3, 1],
            reminder_dates: crate::factory::reminder_dates(&[7, 3, 1], due, None),
            is_hard: true,
            trigger_event: trigger,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_version() {
        let store = MemoryDeadlineStore::new();
        let d = store.insert(draft("app-1", None)).await.unwrap();
        assert!(d.id.starts_with("dl-"));
        assert_eq!(d.version, 0);
        assert_eq!(d.status, DeadlineStatus::Active);
    }

    #[tokio::test]
    async fn test_create_if_absent_dedupes_active() {
        let store = MemoryDeadlineStore::new();
        let first = store
            .create_if_absent(draft("app-1", Some(TriggerEvent::OfferExtended)))
            .await
            .unwrap();
        assert!(first.is_created());

        let second = store
            .create_if_absent(draft("app-1", Some(TriggerEvent::OfferExtended)))
            .await
            .unwrap();
        assert!(!second.is_created());
        assert_eq!(second.into_deadline().id, first.into_deadline().id);
    }

    #[tokio::test]
    async fn test_create_if_absent_ignores_terminal_rows() {
        let store = MemoryDeadlineStore::new();
        let mut first = store
            .create_if_absent(draft("app-1", Some(TriggerEvent::OfferExtended)))
            .await
            .unwrap()
            .into_deadline();
        first.status = DeadlineStatus::Cancelled;
        store.update(&first).await.unwrap();

        // The old row is terminal, so a fresh one may be created
        let second = store
            .create_if_absent(draft("app-1", Some(TriggerEvent::OfferExtended)))
            .await
            .unwrap();
        assert!(second.is_created());
    }

    #[tokio::test]
    async fn test_cas_first_writer_wins() {
        let store = MemoryDeadlineStore::new();
        let base = store.insert(draft("app-1", None)).await.unwrap();

        // Two writers race from the same observed version
        let mut complete = base.clone();
        complete.status = DeadlineStatus::Completed;
        let mut expire = base.clone();
        expire.status = DeadlineStatus::Expired;

        assert!(matches!(
            store.update(&complete).await.unwrap(),
            UpdateOutcome::Applied(_)
        ));
        assert!(matches!(
            store.update(&expire).await.unwrap(),
            UpdateOutcome::Conflict
        ));

        // Final state is exactly one terminal status
        let final_state = store.get(&base.id).await.unwrap().unwrap();
        assert_eq!(final_state.status, DeadlineStatus::Completed);
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_store_error() {
        let store = MemoryDeadlineStore::new();
        let ghost = draft("app-1", None).into_deadline("dl-ghost".into(), Utc::now());
        assert!(store.update(&ghost).await.is_err());
    }
}
