//! # Admitflow — Deadline & Reminder Engine
//!
//! Runs the sweep loop against the durable deadline store, or inspects it.
//!
//! Usage:
//!   admitflow run                          # Start the sweep loop
//!   admitflow trigger app-42 offer_extended
//!   admitflow list app-42
//!   admitflow stats

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use admitflow_core::AdmitflowConfig;
use admitflow_deadline::{
    DeadlineEngine, EscalationRegistry, ExpirationHandler, LogNotifier, NotificationPort,
    RuleCatalog, SweepConfig, TriggerEvent,
};
use admitflow_deadline::dispatch::WebhookNotifier;
use admitflow_deadline::persistence::SqliteDeadlineStore;
use admitflow_deadline::pipeline::{ApplicationStatus, LoggingPipeline, StaticApplications};

#[derive(Parser)]
#[command(name = "admitflow", version, about = "📅 Admitflow deadline engine")]
struct Cli {
    /// Config file path (default: ~/.admitflow/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sweep loop.
    Run,
    /// Feed a pipeline event to the engine (e.g. offer_extended).
    Trigger {
        application_id: String,
        event: String,
    },
    /// List deadlines for an application.
    List { application_id: String },
    /// Print aggregate deadline health.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => AdmitflowConfig::load_from(path)?,
        None => AdmitflowConfig::load()?,
    };

    let db_path = shellexpand::tilde(&config.deadline.db_path).to_string();
    let store = Arc::new(SqliteDeadlineStore::open(std::path::Path::new(&db_path))?);

    let notifier: Arc<dyn NotificationPort> = if config.notify.webhook_url.is_empty() {
        Arc::new(LogNotifier)
    } else {
        Arc::new(WebhookNotifier::new(
            &config.notify.webhook_url,
            config.notify.webhook_headers.clone(),
        ))
    };

    // Demo application table; a real deployment injects its own lookup
    let applications = Arc::new(
        StaticApplications::new()
            .with("app-42", ApplicationStatus::OfferExtended)
            .with("app-43", ApplicationStatus::Enrolled),
    );

    let expiration = Arc::new(ExpirationHandler::new(
        EscalationRegistry::with_defaults(Arc::new(LoggingPipeline)),
        notifier.clone(),
    ));
    let catalog = Arc::new(RuleCatalog::default_catalog()?);
    let engine = DeadlineEngine::new(store, catalog, applications, notifier, expiration);

    match cli.command {
        Commands::Run => {
            let sweeper = Arc::new(engine.sweeper(SweepConfig {
                interval: std::time::Duration::from_secs(config.deadline.sweep_interval_secs),
                concurrency: config.deadline.sweep_concurrency,
                cycle_budget: std::time::Duration::from_secs(config.deadline.cycle_budget_secs),
            }));
            sweeper.run().await;
        }
        Commands::Trigger {
            application_id,
            event,
        } => {
            let event: TriggerEvent = event.parse()?;
            let created = engine.on_trigger_event(&application_id, event).await?;
            for deadline in created {
                println!(
                    "{}  {}  due {}  [{}]",
                    deadline.id,
                    deadline.kind,
                    deadline.due_date.format("%Y-%m-%d"),
                    if deadline.is_hard { "hard" } else { "soft" }
                );
            }
        }
        Commands::List { application_id } => {
            for deadline in engine.list_deadlines(&application_id).await? {
                println!(
                    "{}  {}  {}  due {}  reminders {}/{}",
                    deadline.id,
                    deadline.kind,
                    deadline.status,
                    deadline.due_date.format("%Y-%m-%d"),
                    deadline.fired_reminders.len(),
                    deadline.reminder_dates.len()
                );
            }
        }
        Commands::Stats => {
            let stats = engine.statistics().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
