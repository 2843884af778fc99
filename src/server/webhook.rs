//! Webhook endpoint handler.
//!
//! Deliveries are verified, parsed, and handled to completion before the
//! response goes out; GitHub's response code reflects what actually happened
//! to the delivery. Concurrent deliveries for the same PR serialize inside
//! the gate, not here.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::gate::{GateError, Outcome};
use crate::github::StatusPublisher;
use crate::webhooks::{ParseError, parse_webhook, verify_signature};

use super::AppState;

const HEADER_EVENT: &str = "x-github-event";
const HEADER_DELIVERY: &str = "x-github-delivery";
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that fail a webhook request.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid payload: {0}")]
    Parse(#[from] ParseError),

    #[error("delivery failed: {0}")]
    Gate(#[from] GateError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::Parse(_) => StatusCode::BAD_REQUEST,
            WebhookError::Gate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Handles one GitHub webhook delivery.
///
/// The signature is verified against the raw body before anything is parsed.
/// Event types and actions the gate does not react to are acknowledged with
/// 200 so GitHub does not redeliver them.
pub async fn webhook_handler<P: StatusPublisher>(
    State(state): State<AppState<P>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let delivery_id = get_header(&headers, HEADER_DELIVERY)?;
    let signature_header = get_header(&headers, HEADER_SIGNATURE)?;

    if !verify_signature(&body, &signature_header, state.webhook_secret()) {
        warn!(delivery_id = %delivery_id, "invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    let Some(event) = parse_webhook(&event_type, &body)? else {
        debug!(delivery_id = %delivery_id, event_type = %event_type, "irrelevant delivery");
        return Ok((StatusCode::OK, "ignored"));
    };

    debug!(delivery_id = %delivery_id, repo = %event.repo(), kind = event.kind(),
        "handling delivery");

    match state.gate().handle_event(&event).await {
        Ok(outcome) => {
            info!(delivery_id = %delivery_id, repo = %event.repo(), ?outcome,
                "delivery handled");
            Ok((StatusCode::OK, outcome_label(outcome)))
        }
        Err(e) => {
            error!(delivery_id = %delivery_id, repo = %event.repo(), error = %e,
                "delivery failed");
            Err(WebhookError::Gate(e))
        }
    }
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Published(_) => "published",
        Outcome::SkippedBranch => "branch not enforced",
        Outcome::Ignored => "ignored",
        Outcome::Unchanged => "unchanged",
        Outcome::UntrackedRepo => "untracked repository",
        Outcome::UnknownPr => "unknown pull request",
    }
}

fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}
