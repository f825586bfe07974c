//! Sweep scheduler — the engine's only autonomous actor.
//!
//! Each cycle scans ACTIVE deadlines and fans them out to a bounded worker
//! pool: due items are claimed (CAS to EXPIRED) and handed to the expiration
//! handler; elapsed reminders fire once, in order, marked only after the
//! channel acknowledged. A per-cycle wall-clock budget defers stragglers to
//! the next cycle instead of stalling the loop. One failing item never blocks
//! the rest.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use admitflow_core::error::Result;

use crate::escalation::ExpirationHandler;
use crate::model::{Deadline, DeadlineStatus};
use crate::notify::{DeadlineNotice, NotificationPort};
use crate::pipeline::{ApplicationLookup, ApplicationRecord};
use crate::store::{DeadlineStore, UpdateOutcome};

/// Sweep loop tuning.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between cycles.
    pub interval: Duration,
    /// Max deadlines processed concurrently.
    pub concurrency: usize,
    /// Wall-clock budget per cycle; items not finished in time defer.
    pub cycle_budget: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            concurrency: 8,
            cycle_budget: Duration::from_secs(60),
        }
    }
}

/// What one cycle did. Logged after every pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub reminders_sent: usize,
    pub expired: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub failures: usize,
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scanned, {} reminders, {} expired, {} skipped, {} deferred, {} failures",
            self.scanned,
            self.reminders_sent,
            self.expired,
            self.skipped,
            self.deferred,
            self.failures
        )
    }
}

enum ItemOutcome {
    Expired,
    Reminders { sent: usize, failed: bool },
    Skipped,
    /// Lost a CAS race — another writer already settled the deadline.
    Raced,
    Failed,
    Deferred,
}

/// The periodic evaluator. Assumes it is the sole sweep owner; running two
/// instances against one store needs external leader election.
pub struct SweepScheduler {
    store: Arc<dyn DeadlineStore>,
    applications: Arc<dyn ApplicationLookup>,
    notifier: Arc<dyn NotificationPort>,
    expiration: Arc<ExpirationHandler>,
    config: SweepConfig,
}

impl SweepScheduler {
    pub fn new(
        store: Arc<dyn DeadlineStore>,
        applications: Arc<dyn ApplicationLookup>,
        notifier: Arc<dyn NotificationPort>,
        expiration: Arc<ExpirationHandler>,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            applications,
            notifier,
            expiration,
            config,
        }
    }

    /// Run the sweep loop forever. Cycle errors (store down) abort that cycle
    /// only; the loop resumes at the next tick.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            "⏰ Deadline sweep started (every {:?}, concurrency {}, budget {:?})",
            self.config.interval,
            self.config.concurrency,
            self.config.cycle_budget
        );
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.run_cycle(Utc::now()).await {
                Ok(report) if report.scanned > 0 => tracing::info!("🧹 Sweep: {report}"),
                Ok(_) => tracing::debug!("🧹 Sweep: nothing active"),
                Err(e) => {
                    tracing::warn!("⚠️ Sweep cycle aborted: {e} — resuming next interval");
                }
            }
        }
    }

    /// One evaluation pass at the given instant. Public so hosts and tests
    /// can drive the clock themselves.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        // A store outage here aborts the cycle; partial progress from earlier
        // cycles stays put (everything downstream is idempotent).
        let active = self.store.list_by_status(DeadlineStatus::Active).await?;

        let mut report = CycleReport {
            scanned: active.len(),
            ..CycleReport::default()
        };
        let budget = tokio::time::Instant::now() + self.config.cycle_budget;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut workers: JoinSet<ItemOutcome> = JoinSet::new();

        for item in active {
            let permit =
                match tokio::time::timeout_at(budget, semaphore.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    _ => {
                        // Budget elapsed before a slot freed: defer the rest
                        report.deferred += 1;
                        continue;
                    }
                };
            let worker = self.worker();
            workers.spawn(async move {
                let _permit = permit;
                match tokio::time::timeout_at(budget, worker.process(item, now)).await {
                    Ok(outcome) => outcome,
                    Err(_) => ItemOutcome::Deferred,
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(ItemOutcome::Expired) => report.expired += 1,
                Ok(ItemOutcome::Reminders { sent, failed }) => {
                    report.reminders_sent += sent;
                    if failed {
                        report.failures += 1;
                    }
                }
                Ok(ItemOutcome::Skipped) | Ok(ItemOutcome::Raced) => report.skipped += 1,
                Ok(ItemOutcome::Failed) => report.failures += 1,
                Ok(ItemOutcome::Deferred) => report.deferred += 1,
                Err(e) => {
                    tracing::warn!("⚠️ Sweep worker panicked: {e}");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    fn worker(&self) -> ItemWorker {
        ItemWorker {
            store: self.store.clone(),
            applications: self.applications.clone(),
            notifier: self.notifier.clone(),
            expiration: self.expiration.clone(),
        }
    }
}

/// Per-item processing, independent of every other item.
#[derive(Clone)]
struct ItemWorker {
    store: Arc<dyn DeadlineStore>,
    applications: Arc<dyn ApplicationLookup>,
    notifier: Arc<dyn NotificationPort>,
    expiration: Arc<ExpirationHandler>,
}

impl ItemWorker {
    async fn process(&self, deadline: Deadline, now: DateTime<Utc>) -> ItemOutcome {
        let application = match self.applications.get(&deadline.application_id).await {
            Ok(app) => app,
            Err(e) => {
                tracing::warn!(
                    "⚠️ Application lookup failed for {}: {e} — retrying next cycle",
                    deadline.id
                );
                return ItemOutcome::Failed;
            }
        };

        // Withdrawn/rejected applications keep their records but see no traffic
        if let Some(app) = &application {
            if !app.status.in_active_pipeline() {
                tracing::debug!(
                    "Skipping {}: application {} is {:?}",
                    deadline.id,
                    deadline.application_id,
                    app.status
                );
                return ItemOutcome::Skipped;
            }
        }

        if deadline.is_due(now) {
            self.expire(deadline, application.as_ref()).await
        } else {
            self.fire_reminders(deadline, now).await
        }
    }

    /// Claim the expiry first (CAS to EXPIRED), then run side effects.
    /// Winning the CAS is what makes the escalation fire exactly once.
    async fn expire(
        &self,
        mut deadline: Deadline,
        application: Option<&ApplicationRecord>,
    ) -> ItemOutcome {
        deadline.status = DeadlineStatus::Expired;
        match self.store.update(&deadline).await {
            Ok(UpdateOutcome::Applied(expired)) => {
                tracing::info!(
                    "⏰ Deadline expired: {} {} (was due {})",
                    expired.id,
                    expired.kind,
                    expired.due_date.format("%Y-%m-%d %H:%M")
                );
                self.expiration.handle(&expired, application).await;
                ItemOutcome::Expired
            }
            Ok(UpdateOutcome::Conflict) => {
                // Completed or cancelled under us; that write stands
                tracing::debug!("Expiry of {} lost the race; dropping", deadline.id);
                ItemOutcome::Raced
            }
            Err(e) => {
                tracing::warn!("⚠️ Expiry update failed for {}: {e}", deadline.id);
                ItemOutcome::Failed
            }
        }
    }

    /// Fire every elapsed, unfired reminder in ascending order. A delayed
    /// cycle sends each missed reminder once — none skipped, none doubled.
    async fn fire_reminders(&self, mut deadline: Deadline, now: DateTime<Utc>) -> ItemOutcome {
        let mut sent = 0usize;
        for index in deadline.pending_reminders(now) {
            let notice = DeadlineNotice::reminder(&deadline, index);
            if let Err(e) = self.notifier.send(&notice).await {
                tracing::warn!(
                    "📭 Reminder {index} for {} failed: {e} — retrying next cycle",
                    deadline.id
                );
                return ItemOutcome::Reminders { sent, failed: true };
            }

            // Mark fired only after the channel acknowledged
            deadline.fired_reminders.insert(index);
            match self.store.update(&deadline).await {
                Ok(UpdateOutcome::Applied(updated)) => {
                    deadline = updated;
                    sent += 1;
                }
                Ok(UpdateOutcome::Conflict) => {
                    tracing::debug!(
                        "Reminder bookkeeping for {} lost a race; re-evaluating next cycle",
                        deadline.id
                    );
                    return ItemOutcome::Reminders { sent, failed: false };
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Reminder bookkeeping failed for {}: {e}",
                        deadline.id
                    );
                    return ItemOutcome::Reminders { sent, failed: true };
                }
            }
        }
        ItemOutcome::Reminders { sent, failed: false }
    }
}
