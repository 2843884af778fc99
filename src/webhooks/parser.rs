//! Webhook payload parsing.
//!
//! The event type comes from the `X-GitHub-Event` header; the body is parsed
//! according to that type. Unknown event types and irrelevant actions return
//! `Ok(None)` so the server can acknowledge them without doing anything;
//! malformed payloads for a known type are errors.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{PrNumber, RepoId, Sha, UserId};

use super::events::{GitHubEvent, IssueCommentEvent, PrAction, PullRequestEvent};

/// Webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field carried a value the gate cannot interpret.
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a webhook payload into a typed event.
///
/// Returns `Ok(None)` for event types and actions the gate does not react to.
pub fn parse_webhook(event_type: &str, payload: &[u8]) -> Result<Option<GitHubEvent>, ParseError> {
    match event_type {
        "pull_request" => parse_pull_request(payload).map(|opt| opt.map(GitHubEvent::PullRequest)),
        "issue_comment" => parse_issue_comment(payload).map(|opt| opt.map(GitHubEvent::IssueComment)),
        _ => Ok(None),
    }
}

// Raw payload structures. Optional fields are used where GitHub omits data;
// required fields are validated by deserialization itself.

#[derive(Debug, Deserialize)]
struct RawRepository {
    full_name: String,
}

impl RawRepository {
    fn repo_id(&self) -> Result<RepoId, ParseError> {
        RepoId::parse_full_name(&self.full_name).ok_or_else(|| ParseError::InvalidField {
            field: "repository.full_name",
            value: self.full_name.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: u64,
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    pull_request: RawPullRequest,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    id: u64,
    title: Option<String>,
    user: RawUser,
    assignee: Option<RawUser>,
    head: RawRef,
    base: RawRef,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    sha: Option<String>,
    #[serde(rename = "ref")]
    ref_name: String,
}

fn parse_pull_request(payload: &[u8]) -> Result<Option<PullRequestEvent>, ParseError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;

    let action = match raw.action.as_str() {
        "opened" => PrAction::Opened,
        "reopened" => PrAction::Reopened,
        "assigned" => PrAction::Assigned,
        "unassigned" => PrAction::Unassigned,
        "synchronize" => PrAction::Synchronize,
        "closed" => PrAction::Closed,
        "labeled" => PrAction::Labeled,
        "unlabeled" => PrAction::Unlabeled,
        // Other actions (edited, review_requested, ...) are not relevant.
        _ => return Ok(None),
    };

    let head_sha = raw.pull_request.head.sha.ok_or(ParseError::InvalidField {
        field: "pull_request.head.sha",
        value: "null".to_string(),
    })?;

    Ok(Some(PullRequestEvent {
        repo: raw.repository.repo_id()?,
        action,
        number: PrNumber(raw.pull_request.number),
        id: raw.pull_request.id,
        title: raw.pull_request.title.unwrap_or_default(),
        author_id: UserId(raw.pull_request.user.id),
        author_login: raw.pull_request.user.login,
        assignee_id: raw.pull_request.assignee.as_ref().map(|a| UserId(a.id)),
        assignee_login: raw.pull_request.assignee.map(|a| a.login),
        head_sha: Sha::new(head_sha),
        base_branch: raw.pull_request.base.ref_name,
    }))
}

#[derive(Debug, Deserialize)]
struct RawIssueCommentPayload {
    action: String,
    comment: RawComment,
    issue: RawIssue,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    body: Option<String>,
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    // Present exactly when the issue is a PR.
    pull_request: Option<serde_json::Value>,
}

fn parse_issue_comment(payload: &[u8]) -> Result<Option<IssueCommentEvent>, ParseError> {
    let raw: RawIssueCommentPayload = serde_json::from_slice(payload)?;

    // Edits and deletions never change a recorded verdict.
    if raw.action != "created" {
        return Ok(None);
    }

    let pr_number = raw.issue.pull_request.map(|_| PrNumber(raw.issue.number));

    Ok(Some(IssueCommentEvent {
        repo: raw.repository.repo_id()?,
        pr_number,
        body: raw.comment.body.unwrap_or_default(),
        commenter_id: UserId(raw.comment.user.id),
        commenter_login: raw.comment.user.login,
    }))
}
