//! Create-or-merge decision for one incoming field map.
//!
//! Searching → NotFound → Creating, Searching → Found → Merging, and
//! Creating → Conflict (409) → Merging. Every CRM call is awaited in sequence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::crm::{CrmBackend, CrmError, CrmRecord, EntityType, Payload};
use crate::fields::{identity_fields, FieldMap, FIRST_NAME, LAST_NAME, NAME};
use crate::matching::MatchResolver;
use crate::negotiation::{phone_payload, FormatNegotiator, NegotiationError, PhoneEncoding};
use crate::reconcile::context::ConversationContext;
use crate::reconcile::outcome::{
    ReconcileReport, ReconciliationOutcome, UnresolvedField, PHONE_LABEL,
};

#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub entity: EntityType,
    pub fields: FieldMap,
    /// Known record to merge into; skips searching.
    pub record_id: Option<String>,
    pub preferred_phone_encoding: Option<PhoneEncoding>,
}

impl ReconcileRequest {
    pub fn new(entity: EntityType, fields: FieldMap) -> Self {
        Self {
            entity,
            fields,
            record_id: None,
            preferred_phone_encoding: None,
        }
    }

    /// Picks the target record and phone preference from the conversation.
    ///
    /// An explicit id always wins. Without one, the remembered record is used
    /// only when the caller supplied no identity fields: naming someone starts
    /// a new lookup.
    pub fn with_context(
        mut self,
        explicit_id: Option<String>,
        context: &ConversationContext,
        now: DateTime<Utc>,
    ) -> Self {
        self.record_id = explicit_id.or_else(|| {
            if self.fields.identity(self.entity).is_empty() {
                context.current(self.entity, now).map(|r| r.id.clone())
            } else {
                None
            }
        });
        self.preferred_phone_encoding = context.phone_encoding;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FoundVia {
    Context,
    Name,
    Email,
}

/// What a merge managed to write before it finished or failed.
#[derive(Debug, Default)]
struct MergeProgress {
    changed: Vec<String>,
    unresolved: Vec<UnresolvedField>,
    encoding: Option<PhoneEncoding>,
}

impl MergeProgress {
    fn failure(&self, err: impl std::fmt::Display) -> String {
        if self.changed.is_empty() {
            format!("CRM unreachable during update: {err}")
        } else {
            format!(
                "CRM unreachable during update: {err} (already written: {})",
                self.changed.join(", ")
            )
        }
    }
}

struct Merged {
    id: String,
    name: String,
    progress: MergeProgress,
}

#[derive(Clone)]
pub struct Reconciler {
    crm: Arc<dyn CrmBackend>,
    resolver: MatchResolver,
    negotiator: FormatNegotiator,
}

impl Reconciler {
    pub fn new(
        crm: Arc<dyn CrmBackend>,
        resolver: MatchResolver,
        negotiator: FormatNegotiator,
    ) -> Self {
        Self {
            crm,
            resolver,
            negotiator,
        }
    }

    pub async fn reconcile(&self, request: ReconcileRequest) -> ReconcileReport {
        let entity = request.entity;
        info!(
            "Reconciling {entity} with fields [{}]",
            request.fields.names().join(", ")
        );

        if request.fields.is_empty() {
            return failed(entity, "no fields to reconcile".to_string());
        }

        if let Some(id) = request.record_id.clone() {
            info!("Using {entity} {id} from conversation context");
            return self.merge_report(&request, id, FoundVia::Context).await;
        }

        match self.find_existing(&request).await {
            Ok(Some((record, via))) => {
                info!("Found existing {entity} {} via {via:?}", record.id);
                self.merge_report(&request, record.id, via).await
            }
            Ok(None) => {
                info!("No existing {entity} matched, creating");
                self.create(&request).await
            }
            Err(e) => {
                warn!("Search for existing {entity} failed: {e}");
                failed(entity, format!("search failed: {e}"))
            }
        }
    }

    // ── Searching ───────────────────────────────────────────────────────────

    /// Best name match first, then best email match.
    async fn find_existing(
        &self,
        request: &ReconcileRequest,
    ) -> Result<Option<(CrmRecord, FoundVia)>, CrmError> {
        let entity = request.entity;

        if let Some(name) = request.fields.display_name(entity) {
            if let Some(candidate) = self.resolver.best_match(entity, &name).await? {
                info!(
                    "Best {entity} match for '{name}' is {} ({:?})",
                    candidate.record.id, candidate.rank
                );
                return Ok(Some((candidate.record, FoundVia::Name)));
            }
        }

        if let Some(email) = request.fields.primary_email() {
            if let Some(candidate) = self.resolver.best_match(entity, email).await? {
                return Ok(Some((candidate.record, FoundVia::Email)));
            }
        }

        Ok(None)
    }

    // ── Creating ────────────────────────────────────────────────────────────

    async fn create(&self, request: &ReconcileRequest) -> ReconcileReport {
        let entity = request.entity;
        let fields = &request.fields;

        if !fields.has_full_identity(entity) {
            let needed = match entity {
                EntityType::Contact => format!("both {FIRST_NAME} and {LAST_NAME}"),
                EntityType::Account => NAME.to_string(),
            };
            return failed(entity, format!("cannot create a {entity} without {needed}"));
        }

        let record_name = fields.display_name(entity);
        let base = fields.without_phones().to_payload();
        let phones = fields.phones();
        let first_encoding = self
            .negotiator
            .candidates(request.preferred_phone_encoding)
            .first()
            .copied();

        let mut combined = base.clone();
        let mut attempted_encoding = None;
        if let (Some(entries), Some(encoding)) = (phones, first_encoding) {
            combined.extend(phone_payload(entries, encoding));
            attempted_encoding = Some(encoding);
        }

        match self.crm.create(entity, &combined).await {
            Ok(id) => {
                info!("Created {entity} {id}");
                report(
                    entity,
                    ReconciliationOutcome::Created { id },
                    record_name,
                    attempted_encoding,
                )
            }
            Err(e) if e.is_phone_validation() && phones.is_some() => {
                warn!("Create of {entity} rejected the phone, retrying without it: {e}");
                self.create_then_attach_phones(request, base).await
            }
            Err(CrmError::Conflict { .. }) => self.resolve_conflict(request).await,
            Err(e) => {
                warn!("Create of {entity} failed: {e}");
                failed(entity, format!("create failed: {e}"))
            }
        }
    }

    /// Second phase of creation: the record without phones, then phones through
    /// the update path, which validates more leniently.
    async fn create_then_attach_phones(
        &self,
        request: &ReconcileRequest,
        base: Payload,
    ) -> ReconcileReport {
        let entity = request.entity;
        let record_name = request.fields.display_name(entity);

        let id = match self.crm.create(entity, &base).await {
            Ok(id) => id,
            Err(CrmError::Conflict { .. }) => return self.resolve_conflict(request).await,
            Err(e) => {
                warn!("Create of {entity} without phone failed: {e}");
                return failed(entity, format!("create failed: {e}"));
            }
        };
        info!("Created {entity} {id} without phone, attaching phone");

        let Some(entries) = request.fields.phones() else {
            return report(entity, ReconciliationOutcome::Created { id }, record_name, None);
        };

        match self
            .negotiator
            .attach_phones(entity, &id, entries, request.preferred_phone_encoding)
            .await
        {
            Ok(working) => report(
                entity,
                ReconciliationOutcome::Created { id },
                record_name,
                Some(working.encoding),
            ),
            Err(e) => {
                warn!("{entity} {id} saved without phone: {e}");
                report(
                    entity,
                    ReconciliationOutcome::CreatedPartial {
                        id,
                        unresolved: vec![UnresolvedField::new(PHONE_LABEL, e.summary())],
                    },
                    record_name,
                    None,
                )
            }
        }
    }

    // ── Conflict ────────────────────────────────────────────────────────────

    /// The CRM refused the create as a duplicate. Its response carries no id, so
    /// find the record again (email first, then full name) and merge into it.
    async fn resolve_conflict(&self, request: &ReconcileRequest) -> ReconcileReport {
        let entity = request.entity;
        let mut keys = Vec::new();
        if let Some(email) = request.fields.primary_email() {
            keys.push((email.to_string(), FoundVia::Email));
        }
        if let Some(name) = request.fields.display_name(entity) {
            keys.push((name, FoundVia::Name));
        }
        if keys.is_empty() {
            return failed(entity, "CRM reported a duplicate record".to_string());
        }

        let mut existing = None;
        for (key, via) in &keys {
            info!("Create of {entity} conflicted with an existing record, searching by {via:?}");
            match self.resolver.best_match(entity, key).await {
                Ok(Some(candidate)) => {
                    existing = Some((candidate.record, *via));
                    break;
                }
                Ok(None) => info!("No {entity} matches '{key}' after the conflict"),
                Err(e) => return failed(entity, format!("search after conflict failed: {e}")),
            }
        }
        let Some((existing, via)) = existing else {
            let tried: Vec<String> = keys.iter().map(|(key, _)| format!("'{key}'")).collect();
            return failed(
                entity,
                format!(
                    "CRM reported a duplicate {entity} but no record matches {}",
                    tried.join(" or ")
                ),
            );
        };

        match self.merge(request, existing.id, via).await {
            Ok(merged)
                if merged.progress.changed.is_empty() && !merged.progress.unresolved.is_empty() =>
            {
                let reason = merged
                    .progress
                    .unresolved
                    .iter()
                    .map(|u| format!("{}: {}", u.field, u.reason))
                    .collect::<Vec<_>>()
                    .join("; ");
                report(
                    entity,
                    ReconciliationOutcome::Conflict {
                        existing_id: merged.id,
                        reason,
                    },
                    Some(merged.name),
                    None,
                )
            }
            Ok(merged) => updated(entity, merged),
            Err(reason) => failed(entity, reason),
        }
    }

    // ── Merging ─────────────────────────────────────────────────────────────

    async fn merge_report(
        &self,
        request: &ReconcileRequest,
        id: String,
        via: FoundVia,
    ) -> ReconcileReport {
        match self.merge(request, id, via).await {
            Ok(merged) => updated(request.entity, merged),
            Err(reason) => failed(request.entity, reason),
        }
    }

    /// Writes the fields that differ from the stored record. Identity fields are
    /// left alone unless the record was found by email under another name.
    async fn merge(
        &self,
        request: &ReconcileRequest,
        id: String,
        via: FoundVia,
    ) -> Result<Merged, String> {
        let entity = request.entity;
        let stored = match self.crm.fetch(entity, &id).await {
            Ok(record) => record,
            Err(e) => return Err(format!("could not load {entity} {id}: {e}")),
        };
        let mut name = stored.display_name();

        let mut updates = request.fields.without_identity(entity);
        let supplied = request.fields.identity(entity);
        if via == FoundVia::Email && !supplied.is_empty() {
            // supplied parts over stored ones, so a lone firstName keeps the stored lastName
            let corrected = identity_fields(entity)
                .iter()
                .filter_map(|f| supplied.text(f).or_else(|| stored.text(f)))
                .collect::<Vec<_>>()
                .join(" ");
            if !corrected.eq_ignore_ascii_case(&name) {
                info!("Correcting {entity} {id} name from '{name}' to '{corrected}'");
                for (field, value) in supplied {
                    updates.insert(field, value);
                }
                name = corrected;
            }
        }

        let pending: FieldMap = updates
            .into_iter()
            .filter(|(field, value)| !value.matches_stored(field, &stored))
            .collect();

        let mut progress = MergeProgress::default();
        if pending.is_empty() {
            info!("{entity} {id} already up to date");
            return Ok(Merged { id, name, progress });
        }

        let scalars = pending.without_phones();
        if !scalars.is_empty() {
            if let Err(e) = self.write_fields(entity, &id, &scalars, &mut progress).await {
                warn!("Update of {entity} {id} aborted: {e}");
                return Err(progress.failure(e));
            }
        }

        if let Some(entries) = pending.phones() {
            match self
                .negotiator
                .attach_phones(entity, &id, entries, request.preferred_phone_encoding)
                .await
            {
                Ok(working) => {
                    progress.changed.push(PHONE_LABEL.to_string());
                    progress.encoding = Some(working.encoding);
                }
                Err(NegotiationError::Transport(e)) => return Err(progress.failure(e)),
                Err(e) => {
                    warn!("Phone not updated on {entity} {id}: {e}");
                    progress
                        .unresolved
                        .push(UnresolvedField::new(PHONE_LABEL, e.summary()));
                }
            }
        }

        Ok(Merged { id, name, progress })
    }

    /// One update for all of `fields`; when the CRM rejects it, one update per
    /// field so a single bad value does not sink the rest. Only transport errors
    /// are returned.
    async fn write_fields(
        &self,
        entity: EntityType,
        id: &str,
        fields: &FieldMap,
        progress: &mut MergeProgress,
    ) -> Result<(), CrmError> {
        let rejection = match self.crm.update(entity, id, &fields.to_payload()).await {
            Ok(()) => {
                progress
                    .changed
                    .extend(fields.names().into_iter().map(String::from));
                return Ok(());
            }
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => e,
        };

        if fields.len() == 1 {
            progress.unresolved.extend(
                fields
                    .names()
                    .into_iter()
                    .map(|f| UnresolvedField::new(f, rejection.to_string())),
            );
            return Ok(());
        }

        warn!("Update of {entity} {id} rejected ({rejection}), retrying field by field");
        for (field, value) in fields.iter() {
            let single: FieldMap = std::iter::once((field, value.clone())).collect();
            match self.crm.update(entity, id, &single.to_payload()).await {
                Ok(()) => progress.changed.push(field.to_string()),
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    warn!("{entity} {id} rejected {field}: {e}");
                    progress
                        .unresolved
                        .push(UnresolvedField::new(field, e.to_string()));
                }
            }
        }
        Ok(())
    }
}

fn report(
    entity: EntityType,
    outcome: ReconciliationOutcome,
    record_name: Option<String>,
    phone_encoding: Option<PhoneEncoding>,
) -> ReconcileReport {
    ReconcileReport {
        entity,
        outcome,
        record_name,
        phone_encoding,
    }
}

fn failed(entity: EntityType, reason: String) -> ReconcileReport {
    report(entity, ReconciliationOutcome::Failed { reason }, None, None)
}

fn updated(entity: EntityType, merged: Merged) -> ReconcileReport {
    let Merged { id, name, progress } = merged;
    report(
        entity,
        ReconciliationOutcome::UpdatedExisting {
            id,
            changed: progress.changed,
            unresolved: progress.unresolved,
        },
        Some(name),
        progress.encoding,
    )
}
