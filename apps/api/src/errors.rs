use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::attachments::LinkFailure;
use crate::crm::{CrmError, EntityType};
use crate::negotiation::NegotiationError;
use crate::reconcile::relations::RelationError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("CRM error: {0}")]
    Crm(#[from] CrmError),

    #[error("Phone rejected: {0}")]
    PhoneRejected(String),

    #[error("Attachment {attachment_id} uploaded but not linked: {reason}")]
    Unlinked {
        attachment_id: String,
        reason: String,
    },
}

/// Entity type from a path or query segment.
pub fn parse_entity(raw: &str) -> Result<EntityType, AppError> {
    raw.parse().map_err(AppError::Validation)
}

impl From<LinkFailure> for AppError {
    fn from(e: LinkFailure) -> Self {
        match e {
            LinkFailure::UploadFailed(source) => AppError::Crm(source),
            LinkFailure::UploadedButUnlinked {
                attachment_id,
                source,
            } => AppError::Unlinked {
                attachment_id,
                reason: source.to_string(),
            },
        }
    }
}

impl From<RelationError> for AppError {
    fn from(e: RelationError) -> Self {
        match e {
            RelationError::ContactNotFound(_) | RelationError::AccountNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            RelationError::Crm(source) => AppError::Crm(source),
        }
    }
}

impl From<NegotiationError> for AppError {
    fn from(e: NegotiationError) -> Self {
        match e {
            NegotiationError::Transport(source) => AppError::Crm(source),
            NegotiationError::Empty => AppError::Validation(e.to_string()),
            NegotiationError::Exhausted { .. } => AppError::PhoneRejected(e.summary()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::PhoneRejected(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "PHONE_REJECTED",
                msg.clone(),
            ),
            AppError::Crm(CrmError::NotFound(what)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record not found: {what}"),
            ),
            AppError::Crm(e) if e.is_transport() => {
                tracing::error!("CRM unreachable: {e}");
                let status = match e {
                    CrmError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, "CRM_UNAVAILABLE", e.to_string())
            }
            AppError::Crm(e) => {
                tracing::error!("CRM error: {e}");
                (StatusCode::BAD_GATEWAY, "CRM_ERROR", e.to_string())
            }
            AppError::Unlinked {
                attachment_id,
                reason,
            } => {
                tracing::warn!("Attachment {attachment_id} left unlinked: {reason}");
                let body = Json(json!({
                    "error": {
                        "code": "ATTACHMENT_UNLINKED",
                        "message": format!("Attachment uploaded but not linked: {reason}"),
                        "attachment_id": attachment_id
                    }
                }));
                return (StatusCode::BAD_GATEWAY, body).into_response();
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
