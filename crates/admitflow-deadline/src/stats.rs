//! Completion-health metrics derived from a store scan on demand.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use admitflow_core::error::Result;

use crate::model::DeadlineStatus;
use crate::store::DeadlineStore;

/// Aggregate deadline health.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_active: usize,
    /// ACTIVE with due date within [now, now + 7d].
    pub upcoming_this_week: usize,
    /// ACTIVE with due date already past. Non-zero means the sweep is
    /// lagging — a health signal, not a normal state.
    pub overdue: usize,
    /// completed / (completed + expired + cancelled); 0.0 with no terminal rows.
    pub completion_rate: f64,
    /// Mean extension count across all deadlines.
    pub average_extensions: f64,
}

pub struct StatisticsAggregator {
    store: Arc<dyn DeadlineStore>,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<dyn DeadlineStore>) -> Self {
        Self { store }
    }

    pub async fn summarize(&self) -> Result<StatsSnapshot> {
        self.summarize_at(Utc::now()).await
    }

    pub async fn summarize_at(&self, now: DateTime<Utc>) -> Result<StatsSnapshot> {
        let all = self.store.scan_all().await?;
        let week_out = now + Duration::days(7);

        let mut total_active = 0usize;
        let mut upcoming = 0usize;
        let mut overdue = 0usize;
        let mut completed = 0usize;
        let mut terminal = 0usize;
        let mut extensions = 0u64;

        for deadline in &all {
            extensions += u64::from(deadline.extension_count);
            match deadline.status {
                DeadlineStatus::Active => {
                    total_active += 1;
                    if deadline.due_date < now {
                        overdue += 1;
                    } else if deadline.due_date <= week_out {
                        upcoming += 1;
                    }
                }
                DeadlineStatus::Completed => {
                    completed += 1;
                    terminal += 1;
                }
                DeadlineStatus::Expired | DeadlineStatus::Cancelled => terminal += 1,
            }
        }

        let completion_rate = if terminal > 0 {
            completed as f64 / terminal as f64
        } else {
            0.0
        };
        let average_extensions = if all.is_empty() {
            0.0
        } else {
            extensions as f64 / all.len() as f64
        };

        Ok(StatsSnapshot {
            total_active,
            upcoming_this_week: upcoming,
            overdue,
            completion_rate,
            average_extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeadlineDraft;
    use crate::rules::DeadlineKind;
    use crate::store::MemoryDeadlineStore;
    use chrono::TimeZone;

    async fn seed(
        store: &MemoryDeadlineStore,
        due: DateTime<Utc>,
        status: DeadlineStatus,
        extensions: u32,
    ) {
        let mut d = store
            .insert(DeadlineDraft {
                application_id: "app-x".into(),
                kind: DeadlineKind::DocumentSubmission,
                description: "docs".into(),
                due_date: due,
                reminder_offsets_days: vec![],
                reminder_dates: vec![],
                is_hard: false,
                trigger_event: None,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();
        if status != DeadlineStatus::Active || extensions > 0 {
            d.status = status;
            d.extension_count = extensions;
            store.update(&d).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_snapshot_counts() {
        // 10 ACTIVE (3 due within 7 days), 5 COMPLETED, 2 EXPIRED
        let store = Arc::new(MemoryDeadlineStore::new());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        for i in 0..3 {
            seed(&store, now + Duration::days(2 + i), DeadlineStatus::Active, 0).await;
        }
        for i in 0..7 {
            seed(&store, now + Duration::days(20 + i), DeadlineStatus::Active, 0).await;
        }
        for _ in 0..5 {
            seed(&store, now - Duration::days(10), DeadlineStatus::Completed, 0).await;
        }
        for _ in 0..2 {
            seed(&store, now - Duration::days(10), DeadlineStatus::Expired, 0).await;
        }

        let stats = StatisticsAggregator::new(store)
            .summarize_at(now)
            .await
            .unwrap();
        assert_eq!(stats.total_active, 10);
        assert_eq!(stats.upcoming_this_week, 3);
        assert_eq!(stats.overdue, 0);
        assert!((stats.completion_rate - 5.0 / 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_overdue_flags_sweep_lag() {
        let store = Arc::new(MemoryDeadlineStore::new());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        seed(&store, now - Duration::days(1), DeadlineStatus::Active, 0).await;

        let stats = StatisticsAggregator::new(store)
            .summarize_at(now)
            .await
            .unwrap();
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.upcoming_this_week, 0);
    }

    #[tokio::test]
    async fn test_average_extensions() {
        let store = Arc::new(MemoryDeadlineStore::new());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        seed(&store, now + Duration::days(1), DeadlineStatus::Active, 2).await;
        seed(&store, now + Duration::days(1), DeadlineStatus::Active, 1).await;
        seed(&store, now + Duration::days(1), DeadlineStatus::Active, 0).await;

        let stats = StatisticsAggregator::new(store)
            .summarize_at(now)
            .await
            .unwrap();
        assert!((stats.average_extensions - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = Arc::new(MemoryDeadlineStore::new());
        let stats = StatisticsAggregator::new(store).summarize().await.unwrap();
        assert_eq!(stats.total_active, 0);
        assert_eq!(stats.completion_rate, 0.0);
        assert_eq!(stats.average_extensions, 0.0);
    }
}
