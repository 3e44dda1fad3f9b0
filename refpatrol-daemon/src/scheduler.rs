//! Patrol scheduler
//!
//! Spawns one polling loop per configured target plus a single
//! status-tracking loop. Target loops start with staggered offsets so the
//! remotes are not hammered all at once. Each loop runs its cycles
//! serially, so two cycles for one alias can never overlap: an overdue tick
//! is skipped, never run concurrently. Every per-cycle error is caught and
//! logged inside the loop; nothing a single target or execution does can
//! take the scheduler down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use refpatrol_core::domain::target::RepoTarget;

use crate::service::{PollService, StatusTracker};

pub struct Scheduler {
    interval: Duration,
    targets: Vec<RepoTarget>,
    poll: Arc<PollService>,
    tracker: Arc<StatusTracker>,
}

impl Scheduler {
    pub fn new(
        interval: Duration,
        targets: Vec<RepoTarget>,
        poll: Arc<PollService>,
        tracker: Arc<StatusTracker>,
    ) -> Self {
        Self {
            interval,
            targets,
            poll,
            tracker,
        }
    }

    /// Starts all loops and runs until the process is stopped.
    pub async fn run(self) -> Result<()> {
        info!(
            "Starting patrol of {} target(s) (interval: {:?})",
            self.targets.len(),
            self.interval
        );

        let mut handles = Vec::new();
        let count = self.targets.len().max(1) as u32;

        for (idx, target) in self.targets.into_iter().enumerate() {
            let offset = self.interval * idx as u32 / count;
            let service = Arc::clone(&self.poll);
            let interval = self.interval;
            handles.push(tokio::spawn(async move {
                target_loop(service, target, interval, offset).await;
            }));
        }

        let tracker = Arc::clone(&self.tracker);
        let interval = self.interval;
        handles.push(tokio::spawn(async move {
            tracker_loop(tracker, interval).await;
        }));

        // The loops never return; a join here only completes on panic.
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Scheduler task panicked: {}", e);
            }
        }

        Ok(())
    }
}

async fn target_loop(
    service: Arc<PollService>,
    target: RepoTarget,
    interval: Duration,
    offset: Duration,
) {
    info!(
        "{}: polling {} every {:?} (start offset {:?})",
        target.alias, target.url, interval, offset
    );
    time::sleep(offset).await;

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match service.poll_target(&target).await {
            Ok(report) => {
                if report.triggered > 0 || report.trigger_failures > 0 {
                    info!(
                        "{}: cycle {} done: {} new, {} changed, {} triggered, {} trigger failure(s)",
                        target.alias,
                        report.poll_id,
                        report.new,
                        report.changed,
                        report.triggered,
                        report.trigger_failures
                    );
                }
            }
            Err(e) => {
                error!("{}: poll cycle failed: {:#}", target.alias, e);
            }
        }
    }
}

async fn tracker_loop(tracker: Arc<StatusTracker>, interval: Duration) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match tracker.run_pass().await {
            Ok(report) => {
                if report.transitions > 0 || report.query_failures > 0 {
                    info!(
                        "Status pass: {} open, {} transition(s), {} completed, {} query failure(s)",
                        report.open, report.transitions, report.completed, report.query_failures
                    );
                }
            }
            Err(e) => {
                error!("Status tracking pass failed: {:#}", e);
            }
        }
    }
}
