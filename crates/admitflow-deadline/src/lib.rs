//! # Admitflow Deadline Engine
//!
//! Derives time-bound obligations from admissions pipeline events, schedules
//! multi-stage reminders, detects expiry with soft/hard semantics, and reports
//! completion health.
//!
//! ## Architecture
//! ```text
//! Pipeline event (e.g. offer_extended)
//!   → TriggerProcessor.on_event
//!     → RuleCatalog lookup (automatic rules only)
//!     → factory::materialize → DeadlineDraft
//!     → DeadlineStore.create_if_absent (no duplicates)
//!
//! SweepScheduler (tokio interval, default 5 min)
//!   ├── per ACTIVE deadline, bounded worker pool:
//!   │     now ≥ due → CAS to Expired → ExpirationHandler
//!   │     else      → fire elapsed reminders once, in order
//!   └── dispatch failures: logged, retried next cycle
//!
//! ExpirationHandler
//!   ├── always: "expired" notice via NotificationPort
//!   └── hard kinds: registered EscalationAction → PipelinePort
//! ```
//!
//! Every mutation is a compare-and-set on the deadline's version; the first
//! writer to observe ACTIVE wins and the loser sees the final state on
//! re-fetch. Statuses are absorbing: COMPLETED, EXPIRED, and CANCELLED are
//! never left.

pub mod dispatch;
pub mod engine;
pub mod escalation;
pub mod factory;
pub mod model;
pub mod notify;
pub mod persistence;
pub mod pipeline;
pub mod rules;
pub mod stats;
pub mod store;
pub mod sweep;
pub mod trigger;

pub use engine::DeadlineEngine;
pub use escalation::{EscalationAction, EscalationRegistry, ExpirationHandler};
pub use model::{Deadline, DeadlineDraft, DeadlineStatus};
pub use notify::{DeadlineNotice, LogNotifier, NoticeKind, NotificationPort, RecordingNotifier};
pub use pipeline::{ApplicationLookup, ApplicationRecord, ApplicationStatus, PipelinePort};
pub use rules::{DeadlineKind, DeadlineRule, RuleCatalog, RuleCatalogBuilder, TriggerEvent};
pub use stats::{StatisticsAggregator, StatsSnapshot};
pub use store::{CreateOutcome, DeadlineStore, MemoryDeadlineStore, UpdateOutcome};
pub use sweep::{CycleReport, SweepConfig, SweepScheduler};
pub use trigger::TriggerProcessor;
