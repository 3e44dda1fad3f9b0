//! Refpatrol Daemon
//!
//! Watches remote git repositories for ref changes and triggers Cloud Build
//! workflows, keeping an append-only journal of every poll and every build
//! status transition in Postgres.
//!
//! Architecture:
//! - Configuration: CLI flags/environment plus a JSON targets file
//! - Repositories: SQL for the poll journal and the build journal
//! - Store: the journal trait everything coordinates through
//! - Adapters: `git ls-remote` ref source, `gcloud` build backend
//! - Services: poll cycle (fetch, diff, journal, dispatch) and status
//!   tracker
//! - Scheduler: per-target loops plus the tracking loop

pub mod backend;
pub mod config;
pub mod db;
pub mod fakes;
pub mod git;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod store;
