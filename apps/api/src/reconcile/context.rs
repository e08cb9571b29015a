//! Per-conversation memory, owned by the caller.
//!
//! The engine keeps no state between requests. The caller passes the context in
//! with each request and stores the updated copy it gets back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::crm::EntityType;
use crate::negotiation::PhoneEncoding;
use crate::reconcile::outcome::ReconcileReport;

/// Minutes after its last touch that a remembered record stops being "current".
pub const CONTEXT_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRef {
    pub entity: EntityType,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub touched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub last_record: Option<RecordRef>,
    /// Phone encoding the CRM accepted earlier in this conversation.
    #[serde(default)]
    pub phone_encoding: Option<PhoneEncoding>,
}

impl ConversationContext {
    /// The remembered record of type `entity`, unless it has expired.
    pub fn current(&self, entity: EntityType, now: DateTime<Utc>) -> Option<&RecordRef> {
        self.last_record
            .as_ref()
            .filter(|r| r.entity == entity)
            .filter(|r| now - r.touched_at <= Duration::minutes(CONTEXT_TTL_MINUTES))
    }

    pub fn remember(
        &mut self,
        entity: EntityType,
        id: impl Into<String>,
        name: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.last_record = Some(RecordRef {
            entity,
            id: id.into(),
            name,
            touched_at: now,
        });
    }

    /// Folds the result of a reconciliation back into the context.
    pub fn absorb(&mut self, report: &ReconcileReport, now: DateTime<Utc>) {
        if report.outcome.is_success() {
            if let Some(id) = report.outcome.record_id() {
                self.remember(report.entity, id, report.record_name.clone(), now);
            }
        }
        if let Some(encoding) = report.phone_encoding {
            self.phone_encoding = Some(encoding);
        }
    }
}
