//! Axum route handlers for reconciliation, search and relations.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crm::{CrmRecord, EntityType};
use crate::errors::{parse_entity, AppError};
use crate::fields::{parse_fields, RejectedField};
use crate::matching::MatchCandidate;
use crate::reconcile::context::ConversationContext;
use crate::reconcile::engine::ReconcileRequest;
use crate::reconcile::outcome::ReconciliationOutcome;
use crate::reconcile::relations::{
    contact_accounts, link_contact_to_account, unlink_contact_from_account, AccountLink,
    AccountUnlink, ContactAccounts,
};
use crate::reconcile::summary::{render_details, render_summary};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReconcileBody {
    pub entity: String,
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub context: ConversationContext,
    #[serde(default)]
    pub record_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub entity: EntityType,
    pub outcome: ReconciliationOutcome,
    pub summary: String,
    pub rejected_fields: Vec<RejectedField>,
    pub context: ConversationContext,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub entity: String,
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub entity: EntityType,
    pub candidates: Vec<MatchCandidate>,
}

#[derive(Debug, Deserialize)]
pub struct LinkAccountBody {
    pub contact: String,
    pub account: String,
}

#[derive(Debug, Deserialize)]
pub struct UnlinkAccountBody {
    pub contact: String,
    /// Associated account to remove. Absent clears the primary account.
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContactAccountsParams {
    pub contact: String,
}

#[derive(Debug, Serialize)]
pub struct RecordDetailsResponse {
    pub entity: EntityType,
    pub record: CrmRecord,
    pub summary: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/reconcile
///
/// Creates or merges one contact/account from a flat field map. The outcome is
/// always returned with 200, including failures: the caller reads `outcome.status`.
pub async fn handle_reconcile(
    State(state): State<AppState>,
    Json(body): Json<ReconcileBody>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let entity = parse_entity(&body.entity)?;
    let parsed = parse_fields(entity, &body.fields);
    if parsed.fields.is_empty() && parsed.rejected.is_empty() {
        return Err(AppError::Validation("fields cannot be empty".to_string()));
    }

    let now = Utc::now();
    let request = ReconcileRequest::new(entity, parsed.fields).with_context(
        body.record_id,
        &body.context,
        now,
    );
    let report = state.reconciler.reconcile(request).await;

    let mut context = body.context;
    context.absorb(&report, now);

    Ok(Json(ReconcileResponse {
        entity,
        summary: render_summary(&report, &parsed.rejected),
        outcome: report.outcome,
        rejected_fields: parsed.rejected,
        context,
    }))
}

/// GET /api/v1/search?entity=&q=
pub async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let entity = parse_entity(&params.entity)?;
    if params.q.trim().is_empty() {
        return Err(AppError::Validation("q cannot be empty".to_string()));
    }

    let candidates = state.resolver.search(entity, &params.q).await?;
    Ok(Json(SearchResponse { entity, candidates }))
}

/// POST /api/v1/contacts/link-account
pub async fn handle_link_account(
    State(state): State<AppState>,
    Json(body): Json<LinkAccountBody>,
) -> Result<Json<AccountLink>, AppError> {
    if body.contact.trim().is_empty() || body.account.trim().is_empty() {
        return Err(AppError::Validation(
            "contact and account cannot be empty".to_string(),
        ));
    }

    let link =
        link_contact_to_account(state.crm.as_ref(), &state.resolver, &body.contact, &body.account)
            .await?;
    Ok(Json(link))
}

/// POST /api/v1/contacts/unlink-account
pub async fn handle_unlink_account(
    State(state): State<AppState>,
    Json(body): Json<UnlinkAccountBody>,
) -> Result<Json<AccountUnlink>, AppError> {
    if body.contact.trim().is_empty() {
        return Err(AppError::Validation("contact cannot be empty".to_string()));
    }
    let account = body.account.as_deref().filter(|a| !a.trim().is_empty());

    let unlink =
        unlink_contact_from_account(state.crm.as_ref(), &state.resolver, &body.contact, account)
            .await?;
    Ok(Json(unlink))
}

/// GET /api/v1/contacts/accounts?contact=
pub async fn handle_contact_accounts(
    State(state): State<AppState>,
    Query(params): Query<ContactAccountsParams>,
) -> Result<Json<ContactAccounts>, AppError> {
    if params.contact.trim().is_empty() {
        return Err(AppError::Validation("contact cannot be empty".to_string()));
    }

    let accounts = contact_accounts(state.crm.as_ref(), &state.resolver, &params.contact).await?;
    Ok(Json(accounts))
}

/// GET /api/v1/records/:entity/:id
pub async fn handle_record_details(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<Json<RecordDetailsResponse>, AppError> {
    let entity = parse_entity(&entity)?;
    let record = state.crm.fetch(entity, &id).await?;

    Ok(Json(RecordDetailsResponse {
        entity,
        summary: render_details(entity, &record),
        record,
    }))
}
