//! Service layer
//!
//! The poll service runs one fetch → diff → journal → dispatch cycle for a
//! single target; the tracker runs one status pass over all open build
//! executions. Both re-derive every decision from the journal store, so a
//! restart at any point resumes from durable state.

mod poll;
mod tracker;

pub use poll::{CycleReport, PollService};
pub use tracker::{StatusTracker, TrackReport};
