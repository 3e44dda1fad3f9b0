use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use refpatrol_daemon::backend::CloudBuildCli;
use refpatrol_daemon::config::{Args, Config};
use refpatrol_daemon::db;
use refpatrol_daemon::git::GitCli;
use refpatrol_daemon::scheduler::Scheduler;
use refpatrol_daemon::service::{PollService, StatusTracker};
use refpatrol_daemon::store::PgJournal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refpatrol=info,refpatrol_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Refpatrol");

    let args = Args::parse();
    let config = Config::load(args).context("Failed to load configuration")?;
    info!(
        "Loaded {} target(s), poll interval {:?}",
        config.targets.len(),
        config.poll_interval
    );

    info!("Connecting to database...");
    let pool = db::connect_with_retry(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store = Arc::new(PgJournal::new(pool));
    let source = Arc::new(GitCli);
    let backend = Arc::new(CloudBuildCli::from_config(&config));

    let poll = Arc::new(PollService::new(
        store.clone(),
        source.clone(),
        backend.clone(),
    ));
    let tracker = Arc::new(StatusTracker::new(store, backend));

    let targets = config.targets.iter().map(|t| t.repo_target()).collect();
    let scheduler = Scheduler::new(config.poll_interval, targets, poll, tracker);

    scheduler.run().await
}
