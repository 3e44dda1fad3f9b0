//! Refpatrol Core
//!
//! Core types and logic for the refpatrol repository watcher.
//!
//! This crate contains:
//! - Domain types: journal entities shared between the differ, the
//!   dispatcher and the persistence layer (RefSnapshot, BuildJournalEntry,
//!   RepoTarget, build status payloads)
//! - Ref handling: ref-name and filter-pattern validation plus glob pruning
//! - The snapshot differ: classification of freshly fetched refs against
//!   previously journaled state
//!
//! Everything here is pure and synchronous; I/O lives in the daemon crate.

pub mod diff;
pub mod domain;
pub mod refs;
