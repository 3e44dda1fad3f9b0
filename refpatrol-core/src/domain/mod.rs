//! Core domain types
//!
//! These types represent the fundamental entities of the patrol engine and
//! are shared between the daemon services (for classification and dispatch)
//! and the repository layer (for persistence).

pub mod build;
pub mod snapshot;
pub mod target;
