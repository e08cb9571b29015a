pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::attachments::handlers as attachments;
use crate::negotiation::handlers as phones;
use crate::reconcile::handlers as reconcile;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Reconciliation
        .route("/api/v1/reconcile", post(reconcile::handle_reconcile))
        .route("/api/v1/search", get(reconcile::handle_search))
        .route(
            "/api/v1/contacts/link-account",
            post(reconcile::handle_link_account),
        )
        .route(
            "/api/v1/contacts/unlink-account",
            post(reconcile::handle_unlink_account),
        )
        .route(
            "/api/v1/contacts/accounts",
            get(reconcile::handle_contact_accounts),
        )
        // Records
        .route(
            "/api/v1/records/:entity/:id",
            get(reconcile::handle_record_details),
        )
        .route(
            "/api/v1/records/:entity/:id/phone",
            post(phones::handle_attach_phone),
        )
        // Attachments
        .route(
            "/api/v1/records/:entity/:id/attachments",
            post(attachments::handle_upload_attachment),
        )
        .route(
            "/api/v1/records/:entity/:id/attachments/:attachment_id/link",
            post(attachments::handle_retry_link),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::crm::fake::{FakeCrm, FakeState};
    use crate::crm::EntityType;

    fn test_config() -> Config {
        Config {
            crm_url: "http://crm.test/api/v1".to_string(),
            crm_api_key: "test-key".to_string(),
            crm_timeout: Duration::from_secs(1),
            international_phones: false,
            port: 0,
            rust_log: "info".to_string(),
        }
    }

    fn app(configure: impl FnOnce(&mut FakeState)) -> (Router, Arc<FakeCrm>) {
        let crm = Arc::new(
            FakeCrm::new()
                .with_record(
                    EntityType::Contact,
                    json!({
                        "id": "c1",
                        "name": "John Smith",
                        "firstName": "John",
                        "lastName": "Smith",
                        "emailAddress": "john@acme.com",
                    }),
                )
                .with_record(EntityType::Account, json!({"id": "a1", "name": "Acme Corp"}))
                .configure(configure),
        );
        (build_router(AppState::new(crm.clone(), &test_config())), crm)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app(|_| {});
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "crm-reconciler");
    }

    #[tokio::test]
    async fn test_reconcile_merges_and_returns_context() {
        let (app, crm) = app(|_| {});
        let (status, body) = send(
            app,
            post_json(
                "/api/v1/reconcile",
                json!({
                    "entity": "contact",
                    "fields": {
                        "firstName": "John",
                        "lastName": "Smith",
                        "cCurrentTitle": "CTO",
                        "favoriteColor": "blue",
                    },
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["status"], "updated_existing");
        assert_eq!(body["outcome"]["changed"], json!(["cCurrentTitle"]));
        assert_eq!(body["rejected_fields"][0]["field"], "favoriteColor");
        assert_eq!(body["context"]["last_record"]["id"], "c1");
        assert!(body["summary"].as_str().unwrap().contains("Updated Contact"));
        assert_eq!(
            crm.record(EntityType::Contact, "c1").unwrap().text("cCurrentTitle"),
            Some("CTO")
        );
    }

    #[tokio::test]
    async fn test_reconcile_uses_remembered_record() {
        let (app, _) = app(|_| {});
        let (status, body) = send(
            app,
            post_json(
                "/api/v1/reconcile",
                json!({
                    "entity": "Contact",
                    "fields": {"cSkills": "Rust"},
                    "context": {
                        "last_record": {
                            "entity": "Contact",
                            "id": "c1",
                            "touched_at": chrono::Utc::now(),
                        },
                    },
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["id"], "c1");
        assert_eq!(body["outcome"]["changed"], json!(["cSkills"]));
    }

    #[tokio::test]
    async fn test_reconcile_rejects_unknown_entity() {
        let (app, _) = app(|_| {});
        let (status, body) = send(
            app,
            post_json("/api/v1/reconcile", json!({"entity": "Lead", "fields": {"name": "x"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_search_ranks_candidates() {
        let (app, _) = app(|_| {});
        let request = Request::builder()
            .uri("/api/v1/search?entity=contact&q=John%20Smith")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["candidates"][0]["record"]["id"], "c1");
        assert_eq!(body["candidates"][0]["rank"], "exact");
    }

    #[tokio::test]
    async fn test_search_timeout_is_gateway_timeout() {
        let (app, _) = app(|s| s.timeout_on_search = true);
        let request = Request::builder()
            .uri("/api/v1/search?entity=account&q=Acme")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"]["code"], "CRM_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_link_account() {
        let (app, crm) = app(|_| {});
        let (status, body) = send(
            app,
            post_json(
                "/api/v1/contacts/link-account",
                json!({"contact": "John Smith", "account": "Acme"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["account_id"], "a1");
        assert_eq!(
            crm.record(EntityType::Contact, "c1").unwrap().text("accountId"),
            Some("a1")
        );
    }

    #[tokio::test]
    async fn test_link_account_unknown_contact_is_not_found() {
        let (app, _) = app(|_| {});
        let (status, _) = send(
            app,
            post_json(
                "/api/v1/contacts/link-account",
                json!({"contact": "Nobody Here", "account": "Acme"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unlink_account_clears_primary() {
        let (app, crm) = app(|_| {});
        let (status, body) = send(
            app,
            post_json("/api/v1/contacts/unlink-account", json!({"contact": "John Smith"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contact_id"], "c1");
        assert_eq!(body["cleared_field"], "accountId");
        assert_eq!(
            crm.record(EntityType::Contact, "c1").unwrap().fields.get("accountId"),
            Some(&Value::Null)
        );
    }

    #[tokio::test]
    async fn test_contact_accounts() {
        let (app, _) = app(|s| {
            s.relations
                .push(("c1".to_string(), "accounts".to_string(), "a1".to_string()))
        });
        let request = Request::builder()
            .uri("/api/v1/contacts/accounts?contact=John%20Smith")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["primary"], Value::Null);
        assert_eq!(body["associated"][0]["name"], "Acme Corp");
    }

    #[tokio::test]
    async fn test_record_details() {
        let (app, _) = app(|_| {});
        let request = Request::builder()
            .uri("/api/v1/records/contact/c1")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["record"]["emailAddress"], "john@acme.com");
        assert!(body["summary"]
            .as_str()
            .unwrap()
            .starts_with("**Contact Details: John Smith**"));
    }

    #[tokio::test]
    async fn test_record_details_unknown_id_is_not_found() {
        let (app, _) = app(|_| {});
        let request = Request::builder()
            .uri("/api/v1/records/account/nope")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_attach_phone() {
        let (app, crm) = app(|s| s.accept_phone = Some(|p| p.contains('(')));
        let (status, body) = send(
            app,
            post_json(
                "/api/v1/records/contact/c1/phone",
                json!({"phone": "+1 612 875 4460", "kind": "office"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["encoding"], "parenthesized");
        assert_eq!(body["shape"], "collection");
        assert_eq!(body["attempts"], 2);
        assert_eq!(
            crm.record(EntityType::Contact, "c1").unwrap().text("phoneNumber"),
            Some("(612) 875-4460")
        );
    }

    #[tokio::test]
    async fn test_attach_phone_rejected_everywhere() {
        let (app, _) = app(|s| s.accept_phone = Some(|_| false));
        let (status, body) = send(
            app,
            post_json("/api/v1/records/contact/c1/phone", json!({"phone": "6128754460"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "PHONE_REJECTED");
    }

    #[tokio::test]
    async fn test_attach_short_phone_is_validation_error() {
        let (app, crm) = app(|_| {});
        let (status, _) = send(
            app,
            post_json("/api/v1/records/contact/c1/phone", json!({"phone": "875-4460"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(crm.updates().is_empty());
    }

    fn multipart_upload(uri: &str, field: &str) -> Request<Body> {
        let boundary = "X-BOUNDARY";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"field\"\r\n\r\n\
             {field}\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"resume.pdf\"\r\n\
             Content-Type: application/pdf\r\n\r\n\
             %PDF-1.4 test\r\n\
             --{boundary}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_attachment() {
        let (app, crm) = app(|_| {});
        let (status, body) = send(
            app,
            multipart_upload("/api/v1/records/contact/c1/attachments", "cResume"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let attachment_id = body["attachment_id"].as_str().unwrap();
        assert_eq!(
            crm.record(EntityType::Contact, "c1").unwrap().text("cResumeId"),
            Some(attachment_id)
        );
        assert_eq!(crm.attachments()[0].name, "resume.pdf");
    }

    #[tokio::test]
    async fn test_unlinked_upload_returns_attachment_id() {
        let (app, _) = app(|s| s.rejected_fields = vec!["cResumeId"]);
        let (status, body) = send(
            app,
            multipart_upload("/api/v1/records/contact/c1/attachments", "cResume"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "ATTACHMENT_UNLINKED");
        assert!(body["error"]["attachment_id"]
            .as_str()
            .unwrap()
            .starts_with("attachment-"));
    }

    #[tokio::test]
    async fn test_retry_link() {
        let (app, crm) = app(|_| {});
        let (status, body) = send(
            app,
            post_json(
                "/api/v1/records/Contact/c1/attachments/attachment-9/link",
                json!({"field": "cResume"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["attachment_id"], "attachment-9");
        assert!(crm.attachments().is_empty());
    }
}
