//! reqwest implementation of `CrmBackend` for EspoCRM-style REST APIs.
//!
//! Every request carries the `X-Api-Key` header and the configured timeout.
//! Status mapping: 200/201/204 success, 409 conflict, 404 not found, anything
//! else is a rejection carrying the raw body (field-level detail lives there).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::crm::{
    AttachmentUpload, CrmBackend, CrmError, CrmRecord, EntityType, Payload, SearchQuery,
};

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    list: Vec<CrmRecord>,
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: Option<String>,
}

/// HTTP client for the CRM. Cheap to clone; the connection pool is shared.
#[derive(Clone)]
pub struct EspoClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl EspoClient {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, CrmError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Reads the body and maps non-success statuses onto `CrmError`.
    async fn into_body(response: Response, what: &str) -> Result<String, CrmError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            debug!("{what} succeeded with {status}");
            return Ok(body);
        }

        warn!("{what} failed: {status} - {body}");
        Err(match status {
            StatusCode::CONFLICT => CrmError::Conflict { body },
            StatusCode::NOT_FOUND => CrmError::NotFound(what.to_string()),
            _ => CrmError::Rejected {
                status: status.as_u16(),
                body,
            },
        })
    }

    fn parse_id(body: &str) -> Result<String, CrmError> {
        let parsed: IdResponse = serde_json::from_str(body)?;
        parsed.id.filter(|id| !id.is_empty()).ok_or(CrmError::MissingId)
    }
}

#[async_trait]
impl CrmBackend for EspoClient {
    async fn search(
        &self,
        entity: EntityType,
        query: &SearchQuery,
    ) -> Result<Vec<CrmRecord>, CrmError> {
        let response = self
            .client
            .get(self.url(entity.as_str()))
            .header("X-Api-Key", &self.api_key)
            .query(&query.to_params())
            .send()
            .await?;

        let body = Self::into_body(response, &format!("search {entity}")).await?;
        let parsed: ListResponse = serde_json::from_str(&body)?;

        info!(
            "CRM returned {} {entity} records (total: {})",
            parsed.list.len(),
            parsed.total.unwrap_or(parsed.list.len() as u64)
        );
        Ok(parsed.list)
    }

    async fn fetch(&self, entity: EntityType, id: &str) -> Result<CrmRecord, CrmError> {
        let response = self
            .client
            .get(self.url(&format!("{entity}/{id}")))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        let body = Self::into_body(response, &format!("{entity} {id}")).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn create(&self, entity: EntityType, payload: &Payload) -> Result<String, CrmError> {
        info!(
            "Creating {entity} with fields: {:?}",
            payload.keys().collect::<Vec<_>>()
        );

        let response = self
            .client
            .post(self.url(entity.as_str()))
            .header("X-Api-Key", &self.api_key)
            .json(payload)
            .send()
            .await?;

        let body = Self::into_body(response, &format!("create {entity}")).await?;
        Self::parse_id(&body)
    }

    async fn update(
        &self,
        entity: EntityType,
        id: &str,
        payload: &Payload,
    ) -> Result<(), CrmError> {
        info!(
            "Updating {entity} {id} with fields: {:?}",
            payload.keys().collect::<Vec<_>>()
        );

        let response = self
            .client
            .put(self.url(&format!("{entity}/{id}")))
            .header("X-Api-Key", &self.api_key)
            .json(payload)
            .send()
            .await?;

        Self::into_body(response, &format!("update {entity} {id}")).await?;
        Ok(())
    }

    async fn create_attachment(&self, upload: &AttachmentUpload) -> Result<String, CrmError> {
        info!(
            "Uploading attachment '{}' ({}) for {}.{}",
            upload.name, upload.mime_type, upload.related_type, upload.field
        );

        let response = self
            .client
            .post(self.url("Attachment"))
            .header("X-Api-Key", &self.api_key)
            .json(upload)
            .send()
            .await?;

        let body = Self::into_body(response, "create Attachment").await?;
        Self::parse_id(&body)
    }

    async fn related(
        &self,
        entity: EntityType,
        id: &str,
        link: &str,
    ) -> Result<Vec<CrmRecord>, CrmError> {
        let response = self
            .client
            .get(self.url(&format!("{entity}/{id}/{link}")))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        let body = Self::into_body(response, &format!("{entity} {id} {link}")).await?;
        let parsed: ListResponse = serde_json::from_str(&body)?;
        debug!("{entity} {id} has {} related {link}", parsed.list.len());
        Ok(parsed.list)
    }

    async fn unrelate(
        &self,
        entity: EntityType,
        id: &str,
        link: &str,
        foreign_id: &str,
    ) -> Result<(), CrmError> {
        info!("Removing {link} {foreign_id} from {entity} {id}");

        let response = self
            .client
            .delete(self.url(&format!("{entity}/{id}/{link}/{foreign_id}")))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        Self::into_body(response, &format!("unrelate {entity} {id} {link}")).await?;
        Ok(())
    }
}
