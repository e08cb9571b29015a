//! Attachment upload and linking.
//!
//! Two independent CRM calls: the upload creates an Attachment record, and a
//! follow-up update points the owning record's `{field}Id` at it. When only the
//! second call fails the attachment id is handed back so the link can be
//! retried without uploading again.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::crm::{AttachmentUpload, CrmBackend, CrmError, EntityType, Payload};

pub mod handlers;

#[derive(Debug, Error)]
pub enum LinkFailure {
    #[error("attachment upload failed: {0}")]
    UploadFailed(#[source] CrmError),

    #[error("attachment {attachment_id} uploaded but not linked: {source}")]
    UploadedButUnlinked {
        attachment_id: String,
        #[source]
        source: CrmError,
    },
}

/// MIME type from the file extension. Unknown extensions are sent as octet-stream.
pub fn guess_mime(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "rtf" => "application/rtf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", general_purpose::STANDARD.encode(bytes))
}

/// CRM field holding the link for attachment field `field`.
fn link_field(field: &str) -> String {
    format!("{field}Id")
}

#[derive(Clone)]
pub struct AttachmentLinker {
    crm: Arc<dyn CrmBackend>,
}

impl AttachmentLinker {
    pub fn new(crm: Arc<dyn CrmBackend>) -> Self {
        Self { crm }
    }

    /// Uploads `bytes` and links the attachment to `entity`/`id` under `field`.
    /// Returns the attachment id.
    pub async fn link_attachment(
        &self,
        entity: EntityType,
        id: &str,
        bytes: &[u8],
        filename: &str,
        field: &str,
    ) -> Result<String, LinkFailure> {
        let mime = guess_mime(filename);
        let upload = AttachmentUpload {
            name: filename.to_string(),
            mime_type: mime.to_string(),
            role: "Attachment",
            related_type: entity,
            field: field.to_string(),
            file: data_uri(mime, bytes),
        };

        info!(
            "Uploading {filename} ({} bytes, {mime}) for {entity} {id}",
            bytes.len()
        );
        let attachment_id = self
            .crm
            .create_attachment(&upload)
            .await
            .map_err(LinkFailure::UploadFailed)?;

        match self.retry_link(entity, id, &attachment_id, field).await {
            Ok(()) => Ok(attachment_id),
            Err(source) => {
                warn!("Attachment {attachment_id} uploaded but not linked to {entity} {id}: {source}");
                Err(LinkFailure::UploadedButUnlinked {
                    attachment_id,
                    source,
                })
            }
        }
    }

    /// The link step alone, for an attachment that is already uploaded.
    pub async fn retry_link(
        &self,
        entity: EntityType,
        id: &str,
        attachment_id: &str,
        field: &str,
    ) -> Result<(), CrmError> {
        let mut payload = Payload::new();
        payload.insert(link_field(field), json!(attachment_id));
        self.crm.update(entity, id, &payload).await?;
        info!("Linked attachment {attachment_id} to {entity} {id} as {field}");
        Ok(())
    }
}
