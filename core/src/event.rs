//! The outcome log: every engine mutation is recorded as an event.
//!
//! RULE: Events are append-only. They exist for later analysis of
//! offer performance and are never read back into learning state.

use crate::{
    reward::UserResponse,
    types::{ArmId, TenantId, Timestamp},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Variants are only ever appended. Stored payloads depend on the tags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BanditEvent {
    TenantInitialized {
        tenant_id: TenantId,
        arm_count: usize,
    },
    StateRestored {
        tenant_id: TenantId,
        version:   u64,
        dropped:   Vec<ArmId>,
        missing:   Vec<ArmId>,
    },
    OfferSelected {
        tenant_id:       TenantId,
        presentation_id: Uuid,
        arm_id:          ArmId,
        explored:        bool,
    },
    OutcomeRecorded {
        tenant_id:       TenantId,
        presentation_id: Option<Uuid>,
        arm_id:          ArmId,
        response:        UserResponse,
        mrr_value:       f64,
        reward:          f64,
        new_estimate:    f64,
        count:           u64,
    },
    UnknownArmIgnored {
        tenant_id: TenantId,
        arm_id:    ArmId,
    },
    DuplicateOutcomeIgnored {
        tenant_id:       TenantId,
        presentation_id: Uuid,
    },
    EpsilonDecayed {
        tenant_id: TenantId,
        from:      f64,
        to:        f64,
    },
}

impl BanditEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TenantInitialized { .. }       => "tenant_initialized",
            Self::StateRestored { .. }           => "state_restored",
            Self::OfferSelected { .. }           => "offer_selected",
            Self::OutcomeRecorded { .. }         => "outcome_recorded",
            Self::UnknownArmIgnored { .. }       => "unknown_arm_ignored",
            Self::DuplicateOutcomeIgnored { .. } => "duplicate_outcome_ignored",
            Self::EpsilonDecayed { .. }          => "epsilon_decayed",
        }
    }
}

/// A persisted event log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:          Option<i64>,
    pub tenant_id:   TenantId,
    pub recorded_at: Timestamp,
    pub event_type:  String,
    pub payload:     String, // JSON
}

impl EventLogEntry {
    pub fn from_event(
        tenant_id: &str,
        recorded_at: Timestamp,
        event: &BanditEvent,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            tenant_id: tenant_id.to_string(),
            recorded_at,
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
        })
    }

    pub fn event(&self) -> serde_json::Result<BanditEvent> {
        serde_json::from_str(&self.payload)
    }
}

/// One applied outcome, kept for offer-performance analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeRecord {
    pub tenant_id:       TenantId,
    pub presentation_id: Option<Uuid>,
    pub arm_id:          ArmId,
    pub response:        UserResponse,
    pub mrr_value:       f64,
    pub reward:          f64,
    pub recorded_at:     Timestamp,
}
