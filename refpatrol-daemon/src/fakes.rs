//! In-memory test doubles
//!
//! Deterministic stand-ins for the journal store, the ref source and the
//! build backend, used by the engine scenario tests. The memory journal
//! mirrors the Postgres queries closely enough that restart behaviour can
//! be exercised by building a fresh engine over the same journal.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use refpatrol_core::domain::build::{BuildJournalEntry, BuildStatus, TerminalOutcome};
use refpatrol_core::domain::snapshot::RefSnapshot;
use refpatrol_core::refs;

use crate::backend::{BackendError, BuildBackend, TriggeredBuild, cloud_build_terminal_outcome};
use crate::git::{RefSource, RefSourceError};
use crate::store::{JournalStore, NewBuildEntry, StoreError};

// =============================================================================
// Journal store
// =============================================================================

struct JournalInner {
    snapshots: Vec<RefSnapshot>,
    entries: Vec<BuildJournalEntry>,
    next_entry_id: i64,
}

/// Append-only in-memory journal.
///
/// Entry ids start at 1, like the database sequence; id 0 stays reserved
/// for the root parent sentinel.
pub struct MemoryJournal {
    inner: Mutex<JournalInner>,
}

impl Default for MemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(JournalInner {
                snapshots: Vec::new(),
                entries: Vec::new(),
                next_entry_id: 1,
            }),
        }
    }

    pub fn snapshots(&self) -> Vec<RefSnapshot> {
        self.inner.lock().unwrap().snapshots.clone()
    }

    pub fn entries(&self) -> Vec<BuildJournalEntry> {
        self.inner.lock().unwrap().entries.clone()
    }
}

#[async_trait]
impl JournalStore for MemoryJournal {
    async fn insert_snapshot(&self, snapshot: &RefSnapshot) -> Result<(), StoreError> {
        self.inner.lock().unwrap().snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn latest_snapshot(&self, alias: &str) -> Result<Option<RefSnapshot>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .rev()
            .find(|s| s.alias == alias)
            .cloned())
    }

    async fn recorded_refs(&self, alias: &str) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut latest = HashMap::new();
        for snapshot in inner.snapshots.iter().filter(|s| s.alias == alias) {
            for (name, hash) in &snapshot.refs {
                latest.insert(name.clone(), hash.clone());
            }
        }
        Ok(latest)
    }

    async fn dispatched_refs(&self, alias: &str) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut latest = HashMap::new();
        for entry in inner
            .entries
            .iter()
            .filter(|e| e.alias == alias && e.is_root())
        {
            latest.insert(entry.ref_name.clone(), entry.ref_hash.clone());
        }
        Ok(latest)
    }

    async fn insert_build_entry(
        &self,
        entry: &NewBuildEntry,
    ) -> Result<BuildJournalEntry, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entry_id = inner.next_entry_id;
        inner.next_entry_id += 1;
        let entry = entry.clone().with_entry_id(entry_id);
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    async fn open_executions(&self) -> Result<Vec<BuildJournalEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut latest: BTreeMap<Uuid, &BuildJournalEntry> = BTreeMap::new();
        for entry in &inner.entries {
            let slot = latest.entry(entry.execution_id).or_insert(entry);
            if entry.entry_id > slot.entry_id {
                *slot = entry;
            }
        }
        let mut open: Vec<BuildJournalEntry> = latest
            .into_values()
            .filter(|e| !e.terminal)
            .cloned()
            .collect();
        open.sort_by_key(|e| e.entry_id);
        Ok(open)
    }

    async fn chain_for_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<BuildJournalEntry>, StoreError> {
        let mut chain: Vec<BuildJournalEntry> = self
            .inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .cloned()
            .collect();
        chain.sort_by_key(|e| e.entry_id);
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refpatrol_core::domain::build::ROOT_PARENT_ID;

    fn root_entry() -> NewBuildEntry {
        NewBuildEntry::root(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "repo1",
            "refs/heads/main",
            "a".repeat(40),
            BuildStatus::new(json!({ "status": "QUEUED" })),
            false,
        )
    }

    #[tokio::test]
    async fn test_default_journal_ids_start_above_root_sentinel() {
        let journal = MemoryJournal::default();
        let entry = journal.insert_build_entry(&root_entry()).await.unwrap();
        assert_eq!(entry.entry_id, 1);
        assert_ne!(entry.entry_id, ROOT_PARENT_ID);
    }

    #[tokio::test]
    async fn test_chain_query_is_ordered_and_scoped() {
        let journal = MemoryJournal::new();
        let first = journal.insert_build_entry(&root_entry()).await.unwrap();
        let other = journal.insert_build_entry(&root_entry()).await.unwrap();
        let next = NewBuildEntry::transition(
            &first,
            BuildStatus::new(json!({ "status": "WORKING" })),
            false,
        );
        journal.insert_build_entry(&next).await.unwrap();

        let chain = journal.chain_for_execution(first.execution_id).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].entry_id, first.entry_id);
        assert_eq!(chain[1].parent_id, first.entry_id);
        assert!(!chain.iter().any(|e| e.execution_id == other.execution_id));
    }
}

// =============================================================================
// Ref source
// =============================================================================

/// One scripted answer to a `list_refs` call.
enum ScriptedRefs {
    Refs(BTreeMap<String, String>),
    Unreachable,
}

/// Ref source returning pre-scripted responses per repository url.
#[derive(Default)]
pub struct ScriptedRefSource {
    responses: Mutex<HashMap<String, VecDeque<ScriptedRefs>>>,
}

impl ScriptedRefSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful listing for the url.
    pub fn push_refs(&self, url: &str, pairs: &[(&str, &str)]) {
        let refs = pairs
            .iter()
            .map(|(n, h)| (n.to_string(), h.to_string()))
            .collect();
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(ScriptedRefs::Refs(refs));
    }

    /// Queues a fetch failure for the url.
    pub fn push_failure(&self, url: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(ScriptedRefs::Unreachable);
    }
}

#[async_trait]
impl RefSource for ScriptedRefSource {
    async fn list_refs(
        &self,
        url: &str,
        ref_filters: &[String],
    ) -> Result<BTreeMap<String, String>, RefSourceError> {
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());

        match next {
            Some(ScriptedRefs::Refs(refs)) => Ok(refs::prune_refs(refs, ref_filters)),
            Some(ScriptedRefs::Unreachable) | None => Err(RefSourceError::Unreachable {
                url: url.to_string(),
                detail: "scripted failure".to_string(),
            }),
        }
    }
}

// =============================================================================
// Build backend
// =============================================================================

#[derive(Default)]
struct BackendInner {
    fail_next_triggers: usize,
    describe_unavailable: bool,
    statuses: HashMap<Uuid, BuildStatus>,
    triggered: Vec<(String, String, String, Uuid)>,
}

/// Build backend with controllable status progression.
///
/// Triggered builds start as QUEUED; tests advance them with
/// [`ScriptedBackend::set_status`] using Cloud Build style status strings.
#[derive(Default)]
pub struct ScriptedBackend {
    inner: Mutex<BackendInner>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` trigger calls fail.
    pub fn fail_next_triggers(&self, n: usize) {
        self.inner.lock().unwrap().fail_next_triggers = n;
    }

    /// Makes describe calls fail until cleared.
    pub fn set_describe_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().describe_unavailable = unavailable;
    }

    /// Advances an execution to a new status string.
    pub fn set_status(&self, execution_id: Uuid, status: &str) {
        self.inner.lock().unwrap().statuses.insert(
            execution_id,
            BuildStatus::new(json!({ "id": execution_id.to_string(), "status": status })),
        );
    }

    /// Every successful trigger call as (alias, ref name, hash, execution).
    pub fn triggered(&self) -> Vec<(String, String, String, Uuid)> {
        self.inner.lock().unwrap().triggered.clone()
    }
}

#[async_trait]
impl BuildBackend for ScriptedBackend {
    async fn trigger(
        &self,
        alias: &str,
        ref_name: &str,
        ref_hash: &str,
    ) -> Result<TriggeredBuild, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_next_triggers > 0 {
            inner.fail_next_triggers -= 1;
            return Err(BackendError::Unavailable {
                detail: "scripted trigger failure".to_string(),
            });
        }

        let execution_id = Uuid::new_v4();
        let status =
            BuildStatus::new(json!({ "id": execution_id.to_string(), "status": "QUEUED" }));
        inner.statuses.insert(execution_id, status.clone());
        inner.triggered.push((
            alias.to_string(),
            ref_name.to_string(),
            ref_hash.to_string(),
            execution_id,
        ));

        Ok(TriggeredBuild {
            execution_id,
            status,
        })
    }

    async fn describe(&self, execution_id: Uuid) -> Result<BuildStatus, BackendError> {
        let inner = self.inner.lock().unwrap();
        if inner.describe_unavailable {
            return Err(BackendError::Unavailable {
                detail: "scripted describe failure".to_string(),
            });
        }
        inner
            .statuses
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| BackendError::Unavailable {
                detail: format!("unknown execution {}", execution_id),
            })
    }

    fn terminal_outcome(&self, status: &BuildStatus) -> Option<TerminalOutcome> {
        cloud_build_terminal_outcome(status)
    }
}
