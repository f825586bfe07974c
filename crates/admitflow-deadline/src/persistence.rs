//! SQLite-backed deadline store — survives process restarts.
//!
//! Reminders must outlive the process, so the durable store is the default in
//! production. A `version` column backs the compare-and-set contract and a
//! partial unique index backs create-if-absent on active rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use admitflow_core::error::{AdmitflowError, Result};

use crate::model::{Deadline, DeadlineDraft, DeadlineStatus};
use crate::store::{CreateOutcome, DeadlineStore, UpdateOutcome};

/// SQLite-backed implementation of [`DeadlineStore`].
pub struct SqliteDeadlineStore {
    conn: Mutex<Connection>,
}

impl SqliteDeadlineStore {
    /// Open or create the deadline database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| AdmitflowError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS deadlines (
                id TEXT PRIMARY KEY,
                application_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                description TEXT NOT NULL,
                due_date TEXT NOT NULL,
                reminder_offsets TEXT NOT NULL,    -- JSON array of day counts
                reminder_dates TEXT NOT NULL,      -- JSON array of RFC3339
                is_hard INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                trigger_event TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                fired_reminders TEXT NOT NULL DEFAULT '[]',
                extension_count INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                version INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_deadlines_app_status
                ON deadlines(application_id, status);

            -- Backs create-if-absent: one ACTIVE deadline per origin
            CREATE UNIQUE INDEX IF NOT EXISTS idx_deadlines_active_origin
                ON deadlines(application_id, kind, trigger_event)
                WHERE status = 'active' AND trigger_event IS NOT NULL;
         ",
            )
            .map_err(|e| AdmitflowError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn insert_row(conn: &Connection, deadline: &Deadline) -> Result<()> {
        conn.execute(
            "INSERT INTO deadlines
             (id, application_id, kind, description, due_date, reminder_offsets,
              reminder_dates, is_hard, status, trigger_event, created_at,
              completed_at, fired_reminders, extension_count, metadata, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            rusqlite::params![
                deadline.id,
                deadline.application_id,
                deadline.kind.to_string(),
                deadline.description,
                deadline.due_date.to_rfc3339(),
                serde_json::to_string(&deadline.reminder_offsets_days).unwrap_or_default(),
                serde_json::to_string(
                    &deadline
                        .reminder_dates
                        .iter()
                        .map(|d| d.to_rfc3339())
                        .collect::<Vec<_>>()
                )
                .unwrap_or_default(),
                deadline.is_hard as i32,
                deadline.status.to_string(),
                deadline.trigger_event.map(|e| e.to_string()),
                deadline.created_at.to_rfc3339(),
                deadline.completed_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&deadline.fired_reminders).unwrap_or_default(),
                deadline.extension_count,
                deadline.metadata.to_string(),
                deadline.version,
            ],
        )
        .map_err(|e| AdmitflowError::Store(format!("Insert deadline: {e}")))?;
        Ok(())
    }

    fn row_to_deadline(row: &rusqlite::Row<'_>) -> rusqlite::Result<Deadline> {
        let kind_str: String = row.get(2)?;
        let due_str: String = row.get(4)?;
        let offsets_str: String = row.get(5)?;
        let dates_str: String = row.get(6)?;
        let status_str: String = row.get(8)?;
        let trigger_str: Option<String> = row.get(9)?;
        let created_str: String = row.get(10)?;
        let completed_str: Option<String> = row.get(11)?;
        let fired_str: String = row.get(12)?;
        let metadata_str: String = row.get(14)?;

        // A row that fails to decode is corrupt, not a default: mapping a
        // settled status back to ACTIVE would hand it to the sweep again
        let reminder_dates = serde_json::from_str::<Vec<String>>(&dates_str)
            .map_err(|e| decode_err(6, e))?
            .iter()
            .map(|s| parse_ts(s).map_err(|e| decode_err(6, e)))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Deadline {
            id: row.get(0)?,
            application_id: row.get(1)?,
            kind: kind_str.parse().map_err(|e| decode_err(2, e))?,
            description: row.get(3)?,
            due_date: parse_ts(&due_str).map_err(|e| decode_err(4, e))?,
            reminder_offsets_days: serde_json::from_str(&offsets_str)
                .map_err(|e| decode_err(5, e))?,
            reminder_dates,
            is_hard: row.get::<_, i32>(7)? != 0,
            status: status_str.parse().map_err(|e| decode_err(8, e))?,
            trigger_event: trigger_str
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| decode_err(9, e))?,
            created_at: parse_ts(&created_str).map_err(|e| decode_err(10, e))?,
            completed_at: completed_str
                .map(|s| parse_ts(&s))
                .transpose()
                .map_err(|e| decode_err(11, e))?,
            fired_reminders: serde_json::from_str::<BTreeSet<usize>>(&fired_str)
                .map_err(|e| decode_err(12, e))?,
            extension_count: row.get(13)?,
            metadata: serde_json::from_str(&metadata_str).map_err(|e| decode_err(14, e))?,
            version: row.get(15)?,
        })
    }

    fn query_rows(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Deadline>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AdmitflowError::Store(format!("Query deadlines: {e}")))?;
        let rows = stmt
            .query_map(params, Self::row_to_deadline)
            .map_err(|e| AdmitflowError::Store(format!("Query deadlines: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| AdmitflowError::Store(format!("Read deadline row: {e}")))
    }
}

fn parse_ts(s: &str) -> chrono::ParseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc))
}

fn decode_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

const SELECT_COLS: &str = "id, application_id, kind, description, due_date, reminder_offsets, \
     reminder_dates, is_hard, status, trigger_event, created_at, completed_at, \
     fired_reminders, extension_count, metadata, version";

#[async_trait]
impl DeadlineStore for SqliteDeadlineStore {
    async fn insert(&self, draft: DeadlineDraft) -> Result<Deadline> {
        let deadline = draft.into_deadline(format!("dl-{}", uuid::Uuid::new_v4()), Utc::now());
        let conn = self.conn.lock().unwrap();
        Self::insert_row(&conn, &deadline)?;
        Ok(deadline)
    }

    async fn create_if_absent(&self, draft: DeadlineDraft) -> Result<CreateOutcome> {
        let conn = self.conn.lock().unwrap();

        // Look for an ACTIVE row with the same origin
        let sql = format!(
            "SELECT {SELECT_COLS} FROM deadlines
             WHERE application_id = ?1 AND kind = ?2 AND trigger_event IS ?3
               AND status = 'active'"
        );
        let trigger = draft.trigger_event.map(|e| e.to_string());
        let existing = Self::query_rows(
            &conn,
            &sql,
            &[&draft.application_id, &draft.kind.to_string(), &trigger],
        )?;
        if let Some(found) = existing.into_iter().next() {
            return Ok(CreateOutcome::AlreadyActive(found));
        }

        let deadline = draft.into_deadline(format!("dl-{}", uuid::Uuid::new_v4()), Utc::now());
        Self::insert_row(&conn, &deadline)?;
        Ok(CreateOutcome::Created(deadline))
    }

    async fn get(&self, id: &str) -> Result<Option<Deadline>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {SELECT_COLS} FROM deadlines WHERE id = ?1");
        Ok(Self::query_rows(&conn, &sql, &[&id])?.into_iter().next())
    }

    async fn list_by_application(&self, application_id: &str) -> Result<Vec<Deadline>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {SELECT_COLS} FROM deadlines WHERE application_id = ?1 ORDER BY created_at"
        );
        Self::query_rows(&conn, &sql, &[&application_id])
    }

    async fn list_by_status(&self, status: DeadlineStatus) -> Result<Vec<Deadline>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {SELECT_COLS} FROM deadlines WHERE status = ?1 ORDER BY due_date"
        );
        Self::query_rows(&conn, &sql, &[&status.to_string()])
    }

    async fn scan_all(&self) -> Result<Vec<Deadline>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {SELECT_COLS} FROM deadlines");
        Self::query_rows(&conn, &sql, &[])
    }

    async fn update(&self, deadline: &Deadline) -> Result<UpdateOutcome> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE deadlines SET
                    description = ?1, due_date = ?2, reminder_offsets = ?3,
                    reminder_dates = ?4, status = ?5, completed_at = ?6,
                    fired_reminders = ?7, extension_count = ?8, metadata = ?9,
                    version = version + 1
                 WHERE id = ?10 AND version = ?11",
                rusqlite::params![
                    deadline.description,
                    deadline.due_date.to_rfc3339(),
                    serde_json::to_string(&deadline.reminder_offsets_days).unwrap_or_default(),
                    serde_json::to_string(
                        &deadline
                            .reminder_dates
                            .iter()
                            .map(|d| d.to_rfc3339())
                            .collect::<Vec<_>>()
                    )
                    .unwrap_or_default(),
                    deadline.status.to_string(),
                    deadline.completed_at.map(|t| t.to_rfc3339()),
                    serde_json::to_string(&deadline.fired_reminders).unwrap_or_default(),
                    deadline.extension_count,
                    deadline.metadata.to_string(),
                    deadline.id,
                    deadline.version,
                ],
            )
            .map_err(|e| AdmitflowError::Store(format!("Update deadline: {e}")))?;

        if changed == 1 {
            let mut updated = deadline.clone();
            updated.version += 1;
            return Ok(UpdateOutcome::Applied(updated));
        }

        // Distinguish a lost race from a missing row
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM deadlines WHERE id = ?1",
                [&deadline.id],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .map_err(|e| AdmitflowError::Store(format!("Update deadline: {e}")))?;
        if exists {
            Ok(UpdateOutcome::Conflict)
        } else {
            Err(AdmitflowError::Store(format!(
                "unknown deadline id '{}'",
                deadline.id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DeadlineKind, TriggerEvent};
    use chrono::Duration;

    fn draft(app: &str) -> DeadlineDraft {
        let due = Utc::now() + Duration::days(21);
        DeadlineDraft {
            application_id: app.into(),
            kind: DeadlineKind::Deposit,
            description: "deposit".into(),
            due_date: due,
            reminder_offsets_days: vec![14, 7, 1],
            reminder_dates: crate::factory::reminder_dates(&[14, 7, 1], due, None),
            is_hard: true,
            trigger_event: Some(TriggerEvent::EnrollmentConfirmed),
            metadata: serde_json::json!({"cohort": "2024"}),
        }
    }

    fn temp_store(name: &str) -> (SqliteDeadlineStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).ok();
        let store = SqliteDeadlineStore::open(&dir.join("deadlines.db")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_open_and_migrate() {
        let (store, dir) = temp_store("admitflow-db-migrate");
        assert!(store.scan_all().await.unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let (store, dir) = temp_store("admitflow-db-roundtrip");
        let saved = store.insert(draft("app-7")).await.unwrap();

        let loaded = store.get(&saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.application_id, "app-7");
        assert_eq!(loaded.kind, DeadlineKind::Deposit);
        assert_eq!(loaded.reminder_dates.len(), 3);
        assert_eq!(loaded.trigger_event, Some(TriggerEvent::EnrollmentConfirmed));
        assert_eq!(loaded.metadata["cohort"], "2024");
        assert!(loaded.is_hard);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let (store, dir) = temp_store("admitflow-db-idempotent");
        let first = store.create_if_absent(draft("app-1")).await.unwrap();
        assert!(first.is_created());
        let second = store.create_if_absent(draft("app-1")).await.unwrap();
        assert!(!second.is_created());
        assert_eq!(store.scan_all().await.unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let (store, dir) = temp_store("admitflow-db-cas");
        let base = store.insert(draft("app-1")).await.unwrap();

        let mut winner = base.clone();
        winner.status = DeadlineStatus::Expired;
        assert!(matches!(
            store.update(&winner).await.unwrap(),
            UpdateOutcome::Applied(_)
        ));

        let mut loser = base.clone();
        loser.status = DeadlineStatus::Completed;
        assert!(matches!(
            store.update(&loser).await.unwrap(),
            UpdateOutcome::Conflict
        ));

        let final_state = store.get(&base.id).await.unwrap().unwrap();
        assert_eq!(final_state.status, DeadlineStatus::Expired);
        assert_eq!(final_state.version, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_corrupt_row_surfaces_store_error() {
        let (store, dir) = temp_store("admitflow-db-corrupt");
        let d = store.insert(draft("app-1")).await.unwrap();

        // Clobber the status behind the store's back; reads must not
        // reinterpret the row as a live default
        store
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE deadlines SET status = 'archived' WHERE id = ?1",
                [&d.id],
            )
            .unwrap();

        let err = store.get(&d.id).await.unwrap_err();
        assert!(matches!(err, AdmitflowError::Store(_)));
        assert!(store.list_by_application("app-1").await.is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_fired_reminders_persist() {
        let (store, dir) = temp_store("admitflow-db-fired");
        let mut d = store.insert(draft("app-1")).await.unwrap();
        d.fired_reminders.insert(0);
        d.fired_reminders.insert(1);
        store.update(&d).await.unwrap();

        let loaded = store.get(&d.id).await.unwrap().unwrap();
        assert!(loaded.fired_reminders.contains(&0));
        assert!(loaded.fired_reminders.contains(&1));
        assert!(!loaded.fired_reminders.contains(&2));
        std::fs::remove_dir_all(&dir).ok();
    }
}
