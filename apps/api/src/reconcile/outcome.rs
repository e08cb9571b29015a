use serde::Serialize;

use crate::crm::EntityType;
use crate::negotiation::PhoneEncoding;

/// Label used for the phone collection in outcome reports.
pub const PHONE_LABEL: &str = "phone";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedField {
    pub field: String,
    pub reason: String,
}

impl UnresolvedField {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Terminal state of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Created {
        id: String,
    },
    /// The record exists but some fields (usually the phone) could not be written.
    CreatedPartial {
        id: String,
        unresolved: Vec<UnresolvedField>,
    },
    UpdatedExisting {
        id: String,
        changed: Vec<String>,
        unresolved: Vec<UnresolvedField>,
    },
    Conflict {
        existing_id: String,
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl ReconciliationOutcome {
    /// Id of the record the outcome refers to, if one exists.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            ReconciliationOutcome::Created { id }
            | ReconciliationOutcome::CreatedPartial { id, .. }
            | ReconciliationOutcome::UpdatedExisting { id, .. } => Some(id),
            ReconciliationOutcome::Conflict { existing_id, .. } => Some(existing_id),
            ReconciliationOutcome::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            ReconciliationOutcome::Failed { .. } | ReconciliationOutcome::Conflict { .. }
        )
    }
}

/// Outcome plus what the presentation layer and the conversation context need.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub entity: EntityType,
    pub outcome: ReconciliationOutcome,
    /// Display name of the record the outcome refers to.
    pub record_name: Option<String>,
    /// Encoding the CRM accepted for phones during this run.
    pub phone_encoding: Option<PhoneEncoding>,
}
