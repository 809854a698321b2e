//! State store: persists bandit snapshots and the outcome log per tenant.
//!
//! RULE: Only the store talks to the database.
//! The engine calls store methods and never executes SQL directly.
//!
//! Writes are guarded by an optimistic version check: a writer presents the
//! version it loaded, and the write fails with VersionConflict if another
//! writer got there first.

use crate::{
    error::{BanditError, BanditResult},
    event::{EventLogEntry, OutcomeRecord},
    snapshot::BanditSnapshot,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

mod memory;
mod outcome;

pub use memory::MemoryStore;
pub use outcome::ArmOutcomeSummary;

/// A snapshot together with the version it was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedSnapshot {
    pub version:  u64,
    pub snapshot: BanditSnapshot,
}

/// The persistence contract the engine relies on.
pub trait SnapshotStore: Send + Sync {
    fn load_snapshot(&self, tenant_id: &str) -> BanditResult<Option<VersionedSnapshot>>;

    /// Store `snapshot` if the current version equals `expected_version`
    /// (0 = nothing stored yet). Returns the new version.
    fn save_snapshot(
        &self,
        tenant_id: &str,
        snapshot: &BanditSnapshot,
        expected_version: u64,
    ) -> BanditResult<u64>;

    /// Atomically save the snapshot and append the outcome row.
    /// Fails with DuplicateOutcome if the presentation id was already applied.
    fn commit_outcome(
        &self,
        snapshot: &BanditSnapshot,
        expected_version: u64,
        outcome: &OutcomeRecord,
    ) -> BanditResult<u64>;

    fn append_event(&self, entry: &EventLogEntry) -> BanditResult<()>;

    fn events_for_tenant(&self, tenant_id: &str) -> BanditResult<Vec<EventLogEntry>>;

    fn outcomes_for_tenant(&self, tenant_id: &str) -> BanditResult<Vec<OutcomeRecord>>;

    /// Remove the tenant's stored state. Returns false if nothing was stored.
    fn evict_tenant(&self, tenant_id: &str) -> BanditResult<bool>;
}

/// Lets several engines share one store, e.g. to model separate processes.
impl<T: SnapshotStore + ?Sized> SnapshotStore for std::sync::Arc<T> {
    fn load_snapshot(&self, tenant_id: &str) -> BanditResult<Option<VersionedSnapshot>> {
        (**self).load_snapshot(tenant_id)
    }

    fn save_snapshot(
        &self,
        tenant_id: &str,
        snapshot: &BanditSnapshot,
        expected_version: u64,
    ) -> BanditResult<u64> {
        (**self).save_snapshot(tenant_id, snapshot, expected_version)
    }

    fn commit_outcome(
        &self,
        snapshot: &BanditSnapshot,
        expected_version: u64,
        outcome: &OutcomeRecord,
    ) -> BanditResult<u64> {
        (**self).commit_outcome(snapshot, expected_version, outcome)
    }

    fn append_event(&self, entry: &EventLogEntry) -> BanditResult<()> {
        (**self).append_event(entry)
    }

    fn events_for_tenant(&self, tenant_id: &str) -> BanditResult<Vec<EventLogEntry>> {
        (**self).events_for_tenant(tenant_id)
    }

    fn outcomes_for_tenant(&self, tenant_id: &str) -> BanditResult<Vec<OutcomeRecord>> {
        (**self).outcomes_for_tenant(tenant_id)
    }

    fn evict_tenant(&self, tenant_id: &str) -> BanditResult<bool> {
        (**self).evict_tenant(tenant_id)
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> BanditResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> BanditResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> BanditResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(include_str!("../../../migrations/001_bandit_state.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/002_outcome_log.sql"))?;
        Ok(())
    }

    // ── Snapshots ──────────────────────────────────────────────

    pub fn tenant_count(&self) -> BanditResult<i64> {
        let conn = self.conn.lock();
        let n = conn.query_row("SELECT COUNT(*) FROM bandit_state", [], |row| row.get(0))?;
        Ok(n)
    }

    fn read_snapshot(conn: &Connection, tenant_id: &str) -> BanditResult<Option<VersionedSnapshot>> {
        let row = conn
            .query_row(
                "SELECT version, state_json FROM bandit_state WHERE tenant_id = ?1",
                params![tenant_id],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match row {
            Some((version, json)) => Ok(Some(VersionedSnapshot {
                version,
                snapshot: BanditSnapshot::from_json(&json)?,
            })),
            None => Ok(None),
        }
    }

    fn write_snapshot(
        tx: &Transaction<'_>,
        tenant_id: &str,
        snapshot: &BanditSnapshot,
        expected_version: u64,
    ) -> BanditResult<u64> {
        let actual: u64 = tx
            .query_row(
                "SELECT version FROM bandit_state WHERE tenant_id = ?1",
                params![tenant_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|v| v as u64)
            .unwrap_or(0);

        if actual != expected_version {
            return Err(BanditError::VersionConflict {
                tenant_id: tenant_id.to_string(),
                expected:  expected_version,
                actual,
            });
        }

        let next = expected_version + 1;
        tx.execute(
            "INSERT INTO bandit_state (tenant_id, version, state_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (tenant_id) DO UPDATE
             SET version = excluded.version,
                 state_json = excluded.state_json,
                 updated_at = excluded.updated_at",
            params![tenant_id, next as i64, snapshot.to_json()?, chrono::Utc::now()],
        )?;
        Ok(next)
    }
}

impl SnapshotStore for SqliteStore {
    fn load_snapshot(&self, tenant_id: &str) -> BanditResult<Option<VersionedSnapshot>> {
        let conn = self.conn.lock();
        Self::read_snapshot(&conn, tenant_id)
    }

    fn save_snapshot(
        &self,
        tenant_id: &str,
        snapshot: &BanditSnapshot,
        expected_version: u64,
    ) -> BanditResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let version = Self::write_snapshot(&tx, tenant_id, snapshot, expected_version)?;
        tx.commit()?;
        Ok(version)
    }

    fn commit_outcome(
        &self,
        snapshot: &BanditSnapshot,
        expected_version: u64,
        outcome: &OutcomeRecord,
    ) -> BanditResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::insert_outcome(&tx, outcome)?;
        let version = Self::write_snapshot(&tx, &outcome.tenant_id, snapshot, expected_version)?;
        tx.commit()?;
        Ok(version)
    }

    fn append_event(&self, entry: &EventLogEntry) -> BanditResult<()> {
        let conn = self.conn.lock();
        Self::insert_event(&conn, entry)
    }

    fn events_for_tenant(&self, tenant_id: &str) -> BanditResult<Vec<EventLogEntry>> {
        let conn = self.conn.lock();
        Self::select_events(&conn, tenant_id)
    }

    fn outcomes_for_tenant(&self, tenant_id: &str) -> BanditResult<Vec<OutcomeRecord>> {
        let conn = self.conn.lock();
        Self::select_outcomes(&conn, tenant_id)
    }

    fn evict_tenant(&self, tenant_id: &str) -> BanditResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM bandit_state WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        Ok(n > 0)
    }
}
