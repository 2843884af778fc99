//! GitHub Status API integration.
//!
//! The gate talks to GitHub through the [`StatusPublisher`] trait so the
//! engine can be driven by a recording fake in tests. The production
//! implementation is [`OctocrabClient`], which retries transient API failures
//! with exponential backoff.

mod client;
mod error;
mod retry;

pub use client::{OctocrabClient, RemotePullRequest};
pub use error::{GitHubApiError, GitHubErrorKind};
pub use retry::{RetryConfig, retry_with_backoff};

use async_trait::async_trait;

use crate::types::{RepoId, Sha, StatusState};

/// The status context the gate publishes under. One context means each new
/// publish replaces the previous verdict for that commit.
pub const STATUS_CONTEXT: &str = "crhub";

/// The human-readable description attached to every published status.
pub const STATUS_DESCRIPTION: &str = "checks code review status";

/// Publishes commit statuses for a PR's head commit.
#[async_trait]
pub trait StatusPublisher: Send + Sync + 'static {
    async fn publish(
        &self,
        repo: &RepoId,
        sha: &Sha,
        state: StatusState,
    ) -> Result<(), GitHubApiError>;
}

/// Lists a repository's open PRs; the reconciliation poller reads through
/// this so it can be fed canned listings in tests.
#[async_trait]
pub trait PullRequestSource: Send + Sync + 'static {
    async fn list_open_prs(
        &self,
        repo: &RepoId,
    ) -> Result<Vec<RemotePullRequest>, GitHubApiError>;
}
