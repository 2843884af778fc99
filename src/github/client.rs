//! Octocrab-backed GitHub client.
//!
//! One client serves every tracked repository; the token comes from
//! configuration. Status publication goes through the plain REST endpoint
//! because octocrab has no typed wrapper for it.

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::Serialize;

use crate::types::{PrNumber, RepoId, Sha, StatusState, UserId};

use super::error::GitHubApiError;
use super::retry::{RetryConfig, retry_with_backoff};
use super::{PullRequestSource, STATUS_CONTEXT, STATUS_DESCRIPTION, StatusPublisher};

/// An open PR as reported by the list endpoint, carrying exactly the fields
/// the gate persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePullRequest {
    pub number: PrNumber,
    pub id: u64,
    pub title: String,
    pub author_id: UserId,
    pub author_login: String,
    pub assignee_id: Option<UserId>,
    pub assignee_login: Option<String>,
    pub head_sha: Sha,
    pub base_ref: String,
}

#[derive(Debug, Serialize)]
struct CreateStatusRequest<'a> {
    state: &'a str,
    context: &'a str,
    description: &'a str,
}

/// GitHub client wrapping octocrab.
#[derive(Clone)]
pub struct OctocrabClient {
    client: Octocrab,
    retry: RetryConfig,
}

impl OctocrabClient {
    /// Builds a client authenticating with a personal access token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self {
            client,
            retry: RetryConfig::DEFAULT,
        })
    }

    /// Overrides the backoff schedule (tests use millisecond delays).
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn set_status(
        &self,
        repo: &RepoId,
        sha: &Sha,
        state: StatusState,
    ) -> Result<(), GitHubApiError> {
        let url = format!(
            "/repos/{}/{}/statuses/{}",
            repo.owner,
            repo.repo,
            sha.as_str()
        );
        let request = CreateStatusRequest {
            state: state.as_api_str(),
            context: STATUS_CONTEXT,
            description: STATUS_DESCRIPTION,
        };

        let _response: serde_json::Value = self
            .client
            .post(&url, Some(&request))
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(())
    }
}

#[async_trait]
impl PullRequestSource for OctocrabClient {
    /// Lists every open PR in a repository, following pagination.
    ///
    /// PRs missing an author are skipped with a warning rather than failing
    /// the whole listing.
    async fn list_open_prs(
        &self,
        repo: &RepoId,
    ) -> Result<Vec<RemotePullRequest>, GitHubApiError> {
        let mut page = 1u32;
        let mut all_prs = Vec::new();

        loop {
            let page_result = self
                .client
                .pulls(&repo.owner, &repo.repo)
                .list()
                .state(octocrab::params::State::Open)
                .per_page(100)
                .page(page)
                .send()
                .await
                .map_err(GitHubApiError::from_octocrab)?;

            let items = page_result.items;
            let is_last_page = items.len() < 100;

            for pull in items {
                let author = match pull.user.as_deref() {
                    Some(author) => author,
                    None => {
                        tracing::warn!(repo = %repo, pr = pull.number, "skipping PR without author");
                        continue;
                    }
                };

                all_prs.push(RemotePullRequest {
                    number: PrNumber(pull.number),
                    id: pull.id.0,
                    title: pull.title.clone().unwrap_or_default(),
                    author_id: UserId(author.id.0),
                    author_login: author.login.clone(),
                    assignee_id: pull.assignee.as_deref().map(|a| UserId(a.id.0)),
                    assignee_login: pull.assignee.as_deref().map(|a| a.login.clone()),
                    head_sha: Sha::new(pull.head.sha),
                    base_ref: pull.base.ref_field,
                });
            }

            if is_last_page {
                break;
            }
            page += 1;
        }

        Ok(all_prs)
    }
}

#[async_trait]
impl StatusPublisher for OctocrabClient {
    async fn publish(
        &self,
        repo: &RepoId,
        sha: &Sha,
        state: StatusState,
    ) -> Result<(), GitHubApiError> {
        retry_with_backoff(self.retry, || self.set_status(repo, sha, state)).await?;
        tracing::debug!(repo = %repo, sha = %sha.short(), state = %state, "published commit status");
        Ok(())
    }
}
