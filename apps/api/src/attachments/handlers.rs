//! Axum route handlers for attachments.

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crm::EntityType;
use crate::errors::{parse_entity, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub field: String,
}

#[derive(Debug, Serialize)]
pub struct AttachmentResponse {
    pub attachment_id: String,
    pub entity: EntityType,
    pub record_id: String,
    pub field: String,
}

struct UploadForm {
    filename: String,
    bytes: Bytes,
    field: String,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut file = None;
    let mut field = None;

    while let Some(part) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {e}")))?
    {
        match part.name() {
            Some("file") => {
                let filename = part.file_name().unwrap_or("attachment").to_string();
                let bytes = part
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("could not read file: {e}")))?;
                file = Some((filename, bytes));
            }
            Some("field") => {
                let text = part
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("could not read field: {e}")))?;
                field = Some(text.trim().to_string());
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| AppError::Validation("missing file part".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::Validation("file is empty".to_string()));
    }
    let field = field
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::Validation("missing field part".to_string()))?;

    Ok(UploadForm {
        filename,
        bytes,
        field,
    })
}

/// POST /api/v1/records/:entity/:id/attachments
///
/// Multipart `file` + `field`. Uploads the file and links it to the record.
/// A failed link answers 502 with the attachment id so only the link is retried.
pub async fn handle_upload_attachment(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    multipart: Multipart,
) -> Result<Json<AttachmentResponse>, AppError> {
    let entity = parse_entity(&entity)?;
    let form = read_upload(multipart).await?;

    let attachment_id = state
        .linker
        .link_attachment(entity, &id, &form.bytes, &form.filename, &form.field)
        .await?;

    Ok(Json(AttachmentResponse {
        attachment_id,
        entity,
        record_id: id,
        field: form.field,
    }))
}

/// POST /api/v1/records/:entity/:id/attachments/:attachment_id/link
///
/// Retries only the link step for an attachment that is already uploaded.
pub async fn handle_retry_link(
    State(state): State<AppState>,
    Path((entity, id, attachment_id)): Path<(String, String, String)>,
    Json(req): Json<LinkRequest>,
) -> Result<Json<AttachmentResponse>, AppError> {
    let entity = parse_entity(&entity)?;
    let field = req.field.trim().to_string();
    if field.is_empty() {
        return Err(AppError::Validation("field cannot be empty".to_string()));
    }

    state
        .linker
        .retry_link(entity, &id, &attachment_id, &field)
        .await?;

    Ok(Json(AttachmentResponse {
        attachment_id,
        entity,
        record_id: id,
        field,
    }))
}
