//! In-process store for tests and ephemeral deployments. Nothing survives
//! the process.

use super::{SnapshotStore, VersionedSnapshot};
use crate::{
    error::{BanditError, BanditResult},
    event::{EventLogEntry, OutcomeRecord},
    snapshot::BanditSnapshot,
    types::TenantId,
};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    states:   DashMap<TenantId, VersionedSnapshot>,
    outcomes: Mutex<Vec<OutcomeRecord>>,
    events:   Mutex<Vec<EventLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, tenant_id: &str, snapshot: &BanditSnapshot, expected_version: u64) -> BanditResult<u64> {
        let conflict = |actual| BanditError::VersionConflict {
            tenant_id: tenant_id.to_string(),
            expected:  expected_version,
            actual,
        };
        match self.states.entry(tenant_id.to_string()) {
            Entry::Occupied(mut e) => {
                if e.get().version != expected_version {
                    return Err(conflict(e.get().version));
                }
                let next = expected_version + 1;
                e.insert(VersionedSnapshot { version: next, snapshot: snapshot.clone() });
                Ok(next)
            }
            Entry::Vacant(e) => {
                if expected_version != 0 {
                    return Err(conflict(0));
                }
                e.insert(VersionedSnapshot { version: 1, snapshot: snapshot.clone() });
                Ok(1)
            }
        }
    }
}

impl SnapshotStore for MemoryStore {
    fn load_snapshot(&self, tenant_id: &str) -> BanditResult<Option<VersionedSnapshot>> {
        Ok(self.states.get(tenant_id).map(|s| s.clone()))
    }

    fn save_snapshot(
        &self,
        tenant_id: &str,
        snapshot: &BanditSnapshot,
        expected_version: u64,
    ) -> BanditResult<u64> {
        self.put(tenant_id, snapshot, expected_version)
    }

    fn commit_outcome(
        &self,
        snapshot: &BanditSnapshot,
        expected_version: u64,
        outcome: &OutcomeRecord,
    ) -> BanditResult<u64> {
        // The outcome lock is held across both writes.
        let mut outcomes = self.outcomes.lock();
        if let Some(presentation_id) = outcome.presentation_id {
            let seen = outcomes.iter().any(|o| {
                o.tenant_id == outcome.tenant_id && o.presentation_id == Some(presentation_id)
            });
            if seen {
                return Err(BanditError::DuplicateOutcome {
                    tenant_id: outcome.tenant_id.clone(),
                    presentation_id,
                });
            }
        }
        let version = self.put(&outcome.tenant_id, snapshot, expected_version)?;
        outcomes.push(outcome.clone());
        Ok(version)
    }

    fn append_event(&self, entry: &EventLogEntry) -> BanditResult<()> {
        let mut events = self.events.lock();
        let mut entry = entry.clone();
        entry.id = Some(events.len() as i64 + 1);
        events.push(entry);
        Ok(())
    }

    fn events_for_tenant(&self, tenant_id: &str) -> BanditResult<Vec<EventLogEntry>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn outcomes_for_tenant(&self, tenant_id: &str) -> BanditResult<Vec<OutcomeRecord>> {
        Ok(self
            .outcomes
            .lock()
            .iter()
            .filter(|o| o.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn evict_tenant(&self, tenant_id: &str) -> BanditResult<bool> {
        Ok(self.states.remove(tenant_id).is_some())
    }
}
