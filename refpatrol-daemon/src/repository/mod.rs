//! Repository Module
//!
//! Data access layer for the journal database.
//! Each repository handles SQL for one journal table.

pub mod build_journal;
pub mod snapshot;
