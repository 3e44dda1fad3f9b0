//! Build journal domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `parent_id` sentinel marking the root entry of a build execution's chain.
pub const ROOT_PARENT_ID: i64 = 0;

/// One entry in a build execution's append-only status chain.
///
/// The root entry (`parent_id` = [`ROOT_PARENT_ID`]) is written when the
/// build is triggered; every later entry records a status transition and
/// points at its predecessor through `parent_id`. The chain stops growing
/// once an entry with `terminal` set is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildJournalEntry {
    /// Monotonically assigned by the store.
    pub entry_id: i64,
    pub parent_id: i64,
    /// Backend-assigned handle identifying the execution; shared by every
    /// entry of one chain.
    pub execution_id: Uuid,
    /// Snapshot that caused this build to exist. Carried on every entry,
    /// meaningful on roots.
    pub poll_id: Uuid,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
    pub alias: String,
    pub ref_name: String,
    pub ref_hash: String,
    pub status: BuildStatus,
    /// Whether `status` is terminal per the backend's predicate, evaluated
    /// at insert time. The payload itself stays opaque.
    pub terminal: bool,
}

impl BuildJournalEntry {
    pub fn is_root(&self) -> bool {
        self.parent_id == ROOT_PARENT_ID
    }
}

/// Opaque build status payload as reported by the build backend.
///
/// The engine never interprets the payload's shape; it only compares
/// payloads for equality (a chain records transitions, not polling noise)
/// and defers terminality to the backend's predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildStatus(serde_json::Value);

impl BuildStatus {
    pub fn new(payload: serde_json::Value) -> Self {
        Self(payload)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse classification of a terminal status, supplied by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalOutcome {
    Success,
    Failure,
    /// Backend-specific terminal states such as cancellation or expiry.
    Other,
}

impl std::fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalOutcome::Success => write!(f, "success"),
            TerminalOutcome::Failure => write!(f, "failure"),
            TerminalOutcome::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_equality_is_payload_equality() {
        let a = BuildStatus::new(json!({ "status": "WORKING", "id": "x" }));
        let b = BuildStatus::new(json!({ "status": "WORKING", "id": "x" }));
        let c = BuildStatus::new(json!({ "status": "SUCCESS", "id": "x" }));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_root_detection() {
        let entry = BuildJournalEntry {
            entry_id: 7,
            parent_id: ROOT_PARENT_ID,
            execution_id: Uuid::new_v4(),
            poll_id: Uuid::new_v4(),
            recorded_at: chrono::Utc::now(),
            alias: "repo1".to_string(),
            ref_name: "refs/heads/main".to_string(),
            ref_hash: "a".repeat(40),
            status: BuildStatus::new(json!({ "status": "QUEUED" })),
            terminal: false,
        };
        assert!(entry.is_root());
    }
}
