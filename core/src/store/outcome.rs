use super::SqliteStore;
use crate::{
    error::{BanditError, BanditResult},
    event::{EventLogEntry, OutcomeRecord},
    reward::UserResponse,
    types::Timestamp,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Per-arm outcome totals for one tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArmOutcomeSummary {
    pub arm_id:       String,
    pub accepted:     i64,
    pub declined:     i64,
    pub ignored:      i64,
    pub total_reward: f64,
    /// Sum of mrr_value over accepted outcomes.
    pub mrr_retained: f64,
}

impl ArmOutcomeSummary {
    pub fn acceptance_rate(&self) -> f64 {
        let n = self.accepted + self.declined + self.ignored;
        if n == 0 { 0.0 } else { self.accepted as f64 / n as f64 }
    }
}

impl SqliteStore {
pub(super) fn insert_outcome(conn: &Connection, outcome: &OutcomeRecord) -> BanditResult<()> {
    if let Some(presentation_id) = outcome.presentation_id {
        let seen = conn
            .query_row(
                "SELECT 1 FROM outcome WHERE tenant_id = ?1 AND presentation_id = ?2",
                params![outcome.tenant_id, presentation_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        if seen.is_some() {
            return Err(BanditError::DuplicateOutcome {
                tenant_id: outcome.tenant_id.clone(),
                presentation_id,
            });
        }
    }

    conn.execute(
        "INSERT INTO outcome (
            tenant_id, presentation_id, arm_id, response,
            mrr_value, reward, recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            outcome.tenant_id,
            outcome.presentation_id.map(|p| p.to_string()),
            outcome.arm_id,
            outcome.response.as_str(),
            outcome.mrr_value,
            outcome.reward,
            outcome.recorded_at,
        ],
    )?;
    Ok(())
}

pub(super) fn insert_event(conn: &Connection, entry: &EventLogEntry) -> BanditResult<()> {
    conn.execute(
        "INSERT INTO event_log (tenant_id, recorded_at, event_type, payload)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.tenant_id,
            entry.recorded_at,
            entry.event_type,
            entry.payload,
        ],
    )?;
    Ok(())
}

pub(super) fn select_events(conn: &Connection, tenant_id: &str) -> BanditResult<Vec<EventLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, recorded_at, event_type, payload
         FROM event_log WHERE tenant_id = ?1
         ORDER BY id ASC",
    )?;
    let entries = stmt
        .query_map(params![tenant_id], |row| {
            Ok(EventLogEntry {
                id:          Some(row.get(0)?),
                tenant_id:   row.get(1)?,
                recorded_at: row.get::<_, Timestamp>(2)?,
                event_type:  row.get(3)?,
                payload:     row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub(super) fn select_outcomes(conn: &Connection, tenant_id: &str) -> BanditResult<Vec<OutcomeRecord>> {
    let mut stmt = conn.prepare(
        "SELECT tenant_id, presentation_id, arm_id, response,
                mrr_value, reward, recorded_at
         FROM outcome WHERE tenant_id = ?1
         ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![tenant_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, Timestamp>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(tenant_id, presentation_id, arm_id, response, mrr_value, reward, recorded_at)|
             -> BanditResult<OutcomeRecord> {
            let presentation_id = presentation_id
                .map(|p| uuid::Uuid::parse_str(&p))
                .transpose()
                .map_err(|e| anyhow::anyhow!("bad presentation id in outcome log: {e}"))?;
            let response: UserResponse = response
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            Ok(OutcomeRecord {
                tenant_id,
                presentation_id,
                arm_id,
                response,
                mrr_value,
                reward,
                recorded_at,
            })
        })
        .collect()
}

/// Outcome totals per arm, ordered by arm id.
pub fn arm_outcome_summary(&self, tenant_id: &str) -> BanditResult<Vec<ArmOutcomeSummary>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(
        "SELECT arm_id,
                SUM(CASE WHEN response = 'accepted' THEN 1 ELSE 0 END),
                SUM(CASE WHEN response = 'declined' THEN 1 ELSE 0 END),
                SUM(CASE WHEN response = 'ignored'  THEN 1 ELSE 0 END),
                COALESCE(SUM(reward), 0.0),
                COALESCE(SUM(CASE WHEN response = 'accepted' THEN mrr_value ELSE 0.0 END), 0.0)
         FROM outcome WHERE tenant_id = ?1
         GROUP BY arm_id
         ORDER BY arm_id ASC",
    )?;
    let summaries = stmt
        .query_map(params![tenant_id], |row| {
            Ok(ArmOutcomeSummary {
                arm_id:       row.get(0)?,
                accepted:     row.get(1)?,
                declined:     row.get(2)?,
                ignored:      row.get(3)?,
                total_reward: row.get(4)?,
                mrr_retained: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(summaries)
}

pub fn outcome_count(&self, tenant_id: &str) -> BanditResult<i64> {
    let conn = self.conn.lock();
    let n = conn.query_row(
        "SELECT COUNT(*) FROM outcome WHERE tenant_id = ?1",
        params![tenant_id],
        |row| row.get(0),
    )?;
    Ok(n)
}
}
