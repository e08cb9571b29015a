//! Axum route handler for attaching a phone number to an existing record.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::crm::EntityType;
use crate::errors::{parse_entity, AppError};
use crate::fields::{normalize_phone, PhoneKind};
use crate::negotiation::WorkingFormat;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AttachPhoneRequest {
    pub phone: String,
    /// CRM type label (`Mobile`, `Office`, ...). Defaults to `Mobile`.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub primary: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct AttachPhoneResponse {
    pub entity: EntityType,
    pub record_id: String,
    #[serde(flatten)]
    pub working: WorkingFormat,
}

/// POST /api/v1/records/:entity/:id/phone
///
/// Negotiates an accepted encoding for one number and writes it to the record.
pub async fn handle_attach_phone(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    Json(req): Json<AttachPhoneRequest>,
) -> Result<Json<AttachPhoneResponse>, AppError> {
    let entity = parse_entity(&entity)?;
    let digits = normalize_phone(&req.phone).map_err(|e| AppError::Validation(e.to_string()))?;
    let kind = req.kind.as_deref().map(PhoneKind::parse).unwrap_or_default();

    let working = state
        .negotiator
        .attach_phone(entity, &id, &digits, kind, req.primary.unwrap_or(true))
        .await?;

    Ok(Json(AttachPhoneResponse {
        entity,
        record_id: id,
        working,
    }))
}
