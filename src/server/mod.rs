//! HTTP surface of the sync engine.
//!
//! # Endpoints
//!
//! - `POST /webhook`: accepts remote host deliveries and spools them
//! - `GET /api/v1/installations/{installation_id}/repositories/{repository_id}`:
//!   the tracked repository record, for integration health checks
//! - `GET /health`: liveness

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::store::SyncStore;
use crate::webhooks::WebhookSecret;

pub mod health;
pub mod repository;
pub mod webhook;

pub use health::health_handler;
pub use repository::repository_handler;
pub use webhook::webhook_handler;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    spool_dir: PathBuf,
    webhook_secret: WebhookSecret,
    store: Arc<dyn SyncStore>,
    /// Wakes the dispatcher after a delivery is spooled.
    spooled: Arc<Notify>,
}

impl AppState {
    pub fn new(
        spool_dir: impl Into<PathBuf>,
        webhook_secret: WebhookSecret,
        store: Arc<dyn SyncStore>,
        spooled: Arc<Notify>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                spool_dir: spool_dir.into(),
                webhook_secret,
                store,
                spooled,
            }),
        }
    }

    pub fn spool_dir(&self) -> &PathBuf {
        &self.inner.spool_dir
    }

    pub fn webhook_secret(&self) -> &WebhookSecret {
        &self.inner.webhook_secret
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.inner.store
    }

    fn notify_spooled(&self) {
        self.inner.spooled.notify_one();
    }
}

pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route(
            "/api/v1/installations/{installation_id}/repositories/{repository_id}",
            get(repository_handler),
        )
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    use crate::spool::{SpooledDelivery, drain_pending};
    use crate::store::{MemoryStore, RepositoryStore};
    use crate::test_utils::repository;
    use crate::types::DeliveryId;
    use crate::webhooks::WebhookEvent;

    const SECRET: &[u8] = b"test-secret";

    struct TestApp {
        state: AppState,
        store: Arc<MemoryStore>,
        spooled: Arc<Notify>,
        spool_dir: TempDir,
    }

    fn test_app() -> TestApp {
        let spool_dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let spooled = Arc::new(Notify::new());
        let state = AppState::new(
            spool_dir.path(),
            WebhookSecret::new(SECRET),
            store.clone(),
            spooled.clone(),
        );
        TestApp {
            state,
            store,
            spooled,
            spool_dir,
        }
    }

    fn push_body() -> serde_json::Value {
        serde_json::json!({
            "ref": "refs/heads/main",
            "after": "b".repeat(40),
            "repository": { "id": 10 },
            "installation": { "id": 1 }
        })
    }

    fn webhook_request(
        secret: &[u8],
        event_type: &str,
        delivery_id: &str,
        body: &serde_json::Value,
    ) -> Request<Body> {
        let body_bytes = serde_json::to_vec(body).unwrap();
        let signature = WebhookSecret::new(secret).sign(&body_bytes).unwrap();
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", event_type)
            .header("x-github-delivery", delivery_id)
            .header("x-hub-signature-256", signature)
            .body(Body::from(body_bytes))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // ─── Health ───

    #[tokio::test]
    async fn health_returns_200() {
        let app = test_app();
        let response = build_router(app.state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
    }

    // ─── Webhook ───

    #[tokio::test]
    async fn valid_webhook_is_spooled() {
        let app = test_app();
        let response = build_router(app.state.clone())
            .oneshot(webhook_request(SECRET, "push", "d-1", &push_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_text(response).await, "Accepted");

        let pending = drain_pending(app.spool_dir.path(), chrono::Utc::now()).unwrap();
        assert_eq!(pending.len(), 1);
        let spooled = pending[0].read_event().unwrap();
        assert_eq!(spooled.delivery_id, DeliveryId::new("d-1"));
        assert!(matches!(spooled.event, WebhookEvent::Push(_)));

        // The dispatcher was woken: a stored permit completes immediately.
        tokio::time::timeout(std::time::Duration::from_secs(1), app.spooled.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_delivery_is_accepted_once() {
        let app = test_app();
        for expected in ["Accepted", "Accepted (duplicate)"] {
            let response = build_router(app.state.clone())
                .oneshot(webhook_request(SECRET, "push", "d-1", &push_body()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            assert_eq!(body_text(response).await, expected);
        }
        assert_eq!(
            drain_pending(app.spool_dir.path(), chrono::Utc::now())
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn unsupported_event_is_ignored() {
        let app = test_app();
        let response = build_router(app.state.clone())
            .oneshot(webhook_request(
                SECRET,
                "issue_comment",
                "d-1",
                &serde_json::json!({ "action": "created" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_text(response).await, "Ignored");
        assert!(
            !SpooledDelivery::new(app.spool_dir.path(), DeliveryId::new("d-1"))
                .payload_path
                .exists()
        );
    }

    #[tokio::test]
    async fn bad_signature_returns_401() {
        let app = test_app();
        let response = build_router(app.state.clone())
            .oneshot(webhook_request(b"wrong-secret", "push", "d-1", &push_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(std::fs::read_dir(app.spool_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_headers_return_400() {
        let app = test_app();
        for missing in ["x-github-event", "x-github-delivery", "x-hub-signature-256"] {
            let mut request = webhook_request(SECRET, "push", "d-1", &push_body());
            request.headers_mut().remove(missing);
            let response = build_router(app.state.clone()).oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{missing}");
        }
    }

    #[tokio::test]
    async fn malformed_payload_returns_400() {
        let app = test_app();
        let response = build_router(app.state.clone())
            .oneshot(webhook_request(
                SECRET,
                "push",
                "d-1",
                &serde_json::json!({ "ref": "refs/heads/main" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn spool_failure_returns_500() {
        let dir = tempdir().unwrap();
        // A file where the spool directory should be.
        let blocked = dir.path().join("spool");
        std::fs::write(&blocked, b"").unwrap();
        let state = AppState::new(
            &blocked,
            WebhookSecret::new(SECRET),
            Arc::new(MemoryStore::new()),
            Arc::new(Notify::new()),
        );

        let response = build_router(state)
            .oneshot(webhook_request(SECRET, "push", "d-1", &push_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ─── Repository ───

    #[tokio::test]
    async fn repository_view_redacts_token() {
        let app = test_app();
        let mut repo = repository(1, 10, "cb-1");
        repo.access_token = Some(crate::types::CachedToken {
            token: "ghs_secret".into(),
            expires_at: chrono::Utc::now(),
        });
        app.store.insert_repository(&repo).unwrap();

        let response = build_router(app.state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/installations/1/repositories/10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(!body.contains("ghs_secret"));
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["codebase_id"], "cb-1");
        assert_eq!(json["tracked_branch"], "main");
    }

    #[tokio::test]
    async fn untracked_repository_returns_404() {
        let app = test_app();
        let response = build_router(app.state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/installations/1/repositories/99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
