//! CRM access layer: the only code that knows how records travel to and from
//! the CRM's REST API.
//!
//! `CrmBackend` is the seam the reconciliation engine talks to. `EspoClient` is
//! the reqwest implementation; tests swap in the scripted in-memory backend.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod client;
#[cfg(test)]
pub mod fake;
pub mod query;

pub use client::EspoClient;
pub use query::{Filter, SearchQuery};

/// JSON object sent as the body of a create/update call.
pub type Payload = Map<String, Value>;

// ────────────────────────────────────────────────────────────────────────────
// Entity types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Contact,
    Account,
}

impl EntityType {
    /// Path segment used by the CRM REST API.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Contact => "Contact",
            EntityType::Account => "Account",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contact" | "contacts" => Ok(EntityType::Contact),
            "account" | "accounts" => Ok(EntityType::Account),
            other => Err(format!("unknown entity type '{other}'")),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Records
// ────────────────────────────────────────────────────────────────────────────

/// A record as returned by the CRM. Only `id` is guaranteed; everything else
/// depends on the entity type and the `select` projection of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CrmRecord {
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Display name: the CRM's computed `name`, else `firstName lastName`.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.text("name") {
            return name.to_string();
        }
        [self.text("firstName"), self.text("lastName")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Body of `POST /Attachment`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUpload {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub role: &'static str,
    pub related_type: EntityType,
    pub field: String,
    /// `data:<mime>;base64,<bytes>`
    pub file: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("CRM request timed out")]
    Timeout,

    #[error("failed to connect to CRM: {0}")]
    Connection(String),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("record already exists (status 409): {body}")]
    Conflict { body: String },

    #[error("CRM rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("unexpected CRM response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("CRM response did not include a record id")]
    MissingId,
}

impl From<reqwest::Error> for CrmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CrmError::Timeout
        } else if e.is_connect() {
            CrmError::Connection(e.to_string())
        } else {
            CrmError::Http(e)
        }
    }
}

impl CrmError {
    /// The service could not be reached at all. Retrying other payloads is pointless.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CrmError::Timeout | CrmError::Connection(_) | CrmError::Http(_)
        )
    }

    /// A `400` whose body blames the phone number field.
    pub fn is_phone_validation(&self) -> bool {
        match self {
            CrmError::Rejected { status: 400, body } => {
                body.to_ascii_lowercase().contains("phonenumber")
            }
            _ => false,
        }
    }

    /// HTTP status reported by the CRM, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            CrmError::Conflict { .. } => Some(409),
            CrmError::Rejected { status, .. } => Some(*status),
            CrmError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Backend trait
// ────────────────────────────────────────────────────────────────────────────

/// Operations the reconciliation engine needs from the CRM.
#[async_trait]
pub trait CrmBackend: Send + Sync {
    /// `GET /{Entity}?where[...]`. Returns records in service order.
    async fn search(
        &self,
        entity: EntityType,
        query: &SearchQuery,
    ) -> Result<Vec<CrmRecord>, CrmError>;

    /// `GET /{Entity}/{id}`
    async fn fetch(&self, entity: EntityType, id: &str) -> Result<CrmRecord, CrmError>;

    /// `POST /{Entity}`. Returns the new record id.
    async fn create(&self, entity: EntityType, payload: &Payload) -> Result<String, CrmError>;

    /// `PUT /{Entity}/{id}`
    async fn update(&self, entity: EntityType, id: &str, payload: &Payload)
        -> Result<(), CrmError>;

    /// `POST /Attachment`. Returns the attachment id.
    async fn create_attachment(&self, upload: &AttachmentUpload) -> Result<String, CrmError>;

    /// `GET /{Entity}/{id}/{link}`: records on the far side of a relationship.
    async fn related(
        &self,
        entity: EntityType,
        id: &str,
        link: &str,
    ) -> Result<Vec<CrmRecord>, CrmError>;

    /// `DELETE /{Entity}/{id}/{link}/{foreign_id}`
    async fn unrelate(
        &self,
        entity: EntityType,
        id: &str,
        link: &str,
        foreign_id: &str,
    ) -> Result<(), CrmError>;
}
