//! HTTP server for the review gate.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub webhook deliveries
//! - `GET /health` - Returns 200 if the server is running

use std::sync::Arc;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{WebhookError, webhook_handler};

use crate::gate::ReviewGate;
use crate::github::StatusPublisher;

/// Shared application state, passed to handlers via axum's `State`
/// extractor. Generic over the publisher so router tests can observe
/// publications.
pub struct AppState<P> {
    inner: Arc<AppStateInner<P>>,
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AppStateInner<P> {
    gate: Arc<ReviewGate<P>>,
    webhook_secret: Vec<u8>,
}

impl<P: StatusPublisher> AppState<P> {
    pub fn new(gate: Arc<ReviewGate<P>>, webhook_secret: impl Into<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                gate,
                webhook_secret: webhook_secret.into(),
            }),
        }
    }

    pub fn gate(&self) -> &ReviewGate<P> {
        &self.inner.gate
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }
}

/// Builds the axum router with all endpoints.
pub fn build_router<P: StatusPublisher>(app_state: AppState<P>) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler::<P>))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::{Config, RepoPolicy};
    use crate::github::GitHubApiError;
    use crate::store::Store;
    use crate::types::{RepoId, Sha, StatusState};
    use crate::webhooks::{compute_signature, format_signature_header};

    const SECRET: &[u8] = b"test-secret";

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        published: Arc<StdMutex<Vec<(RepoId, Sha, StatusState)>>>,
    }

    #[async_trait]
    impl StatusPublisher for RecordingPublisher {
        async fn publish(
            &self,
            repo: &RepoId,
            sha: &Sha,
            state: StatusState,
        ) -> Result<(), GitHubApiError> {
            self.published
                .lock()
                .unwrap()
                .push((repo.clone(), sha.clone(), state));
            Ok(())
        }
    }

    fn test_app() -> (axum::Router, RecordingPublisher) {
        let mut repos = HashMap::new();
        repos.insert(RepoId::new("org", "app"), RepoPolicy::default());
        let config = Arc::new(Config {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_path: PathBuf::from(":memory:"),
            webhook_secret: SECRET.to_vec(),
            poll_interval_secs: 60,
            github_token: "token".to_string(),
            repos,
        });

        let publisher = RecordingPublisher::default();
        let store = Store::open_in_memory().unwrap();
        let gate = Arc::new(ReviewGate::new(config, store, publisher.clone()));
        let app = build_router(AppState::new(gate, SECRET));
        (app, publisher)
    }

    fn pr_opened_body() -> serde_json::Value {
        serde_json::json!({
            "action": "opened",
            "pull_request": {
                "number": 42,
                "id": 1042,
                "title": "add feature",
                "user": { "id": 1, "login": "bob" },
                "assignee": null,
                "head": { "sha": "abc123", "ref": "feature" },
                "base": { "sha": "000000", "ref": "master" }
            },
            "repository": { "full_name": "org/app" }
        })
    }

    fn signed_request(secret: &[u8], event_type: &str, body: &serde_json::Value) -> Request<Body> {
        let body_bytes = serde_json::to_vec(body).unwrap();
        let header = format_signature_header(&compute_signature(&body_bytes, secret));

        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", event_type)
            .header("x-github-delivery", "550e8400-e29b-41d4-a716-446655440000")
            .header("x-hub-signature-256", header)
            .body(Body::from(body_bytes))
            .unwrap()
    }

    #[tokio::test]
    async fn health_returns_200() {
        let (app, _publisher) = test_app();

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn valid_delivery_publishes_statuses() {
        let (app, publisher) = test_app();

        let request = signed_request(SECRET, "pull_request", &pr_opened_body());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let published = publisher.published.lock().unwrap().clone();
        assert_eq!(
            published,
            vec![
                (RepoId::new("org", "app"), Sha::new("abc123"), StatusState::Pending),
                (RepoId::new("org", "app"), Sha::new("abc123"), StatusState::Failure),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_signature_returns_401() {
        let (app, publisher) = test_app();

        let request = signed_request(b"wrong-secret", "pull_request", &pr_opened_body());
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_event_header_returns_400() {
        let (app, _publisher) = test_app();

        let body_bytes = serde_json::to_vec(&pr_opened_body()).unwrap();
        let header = format_signature_header(&compute_signature(&body_bytes, SECRET));
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-github-delivery", "550e8400-e29b-41d4-a716-446655440001")
            .header("x-hub-signature-256", header)
            .body(Body::from(body_bytes))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_payload_returns_400() {
        let (app, _publisher) = test_app();

        let request = signed_request(SECRET, "pull_request", &serde_json::json!({"action": "opened"}));
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_event_type_is_acknowledged() {
        let (app, publisher) = test_app();

        let request = signed_request(SECRET, "push", &serde_json::json!({}));
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn untracked_repository_is_acknowledged() {
        let (app, publisher) = test_app();

        let mut body = pr_opened_body();
        body["repository"]["full_name"] = serde_json::json!("other/repo");
        let request = signed_request(SECRET, "pull_request", &body);
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn verdict_delivery_flips_the_status() {
        let (app, publisher) = test_app();

        // Open and assign, then deliver the assignee's approval.
        let mut opened = pr_opened_body();
        opened["pull_request"]["assignee"] = serde_json::json!({ "id": 2, "login": "alice" });
        let response = app
            .clone()
            .oneshot(signed_request(SECRET, "pull_request", &opened))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let comment = serde_json::json!({
            "action": "created",
            "comment": { "body": "+1", "user": { "id": 2, "login": "alice" } },
            "issue": { "number": 42, "pull_request": { "url": "..." } },
            "repository": { "full_name": "org/app" }
        });
        let response = app
            .oneshot(signed_request(SECRET, "issue_comment", &comment))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let published = publisher.published.lock().unwrap().clone();
        assert_eq!(published.last().map(|(_, _, s)| *s), Some(StatusState::Success));
    }
}
