//! Typed webhook events.
//!
//! Only the two event families the gate reacts to are represented; everything
//! else is dropped at parse time.

use crate::store::PullRequestRecord;
use crate::types::{PrNumber, RepoId, Sha, UserId};

/// A webhook delivery the gate may act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubEvent {
    PullRequest(PullRequestEvent),
    IssueComment(IssueCommentEvent),
}

impl GitHubEvent {
    /// The repository the event belongs to.
    pub fn repo(&self) -> &RepoId {
        match self {
            GitHubEvent::PullRequest(e) => &e.repo,
            GitHubEvent::IssueComment(e) => &e.repo,
        }
    }

    /// A short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GitHubEvent::PullRequest(_) => "pull_request",
            GitHubEvent::IssueComment(_) => "issue_comment",
        }
    }
}

/// The `pull_request` actions the gate distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrAction {
    Opened,
    Reopened,
    Assigned,
    Unassigned,
    Synchronize,
    Closed,
    Labeled,
    Unlabeled,
}

impl PrAction {
    /// Whether this action changes anything the gate evaluates.
    pub fn affects_gate(&self) -> bool {
        match self {
            PrAction::Opened
            | PrAction::Reopened
            | PrAction::Assigned
            | PrAction::Unassigned
            | PrAction::Synchronize => true,
            PrAction::Closed | PrAction::Labeled | PrAction::Unlabeled => false,
        }
    }
}

/// A `pull_request` webhook event, carrying the full PR snapshot from the
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub repo: RepoId,
    pub action: PrAction,
    pub number: PrNumber,
    /// GitHub's global PR id.
    pub id: u64,
    pub title: String,
    pub author_id: UserId,
    pub author_login: String,
    pub assignee_id: Option<UserId>,
    pub assignee_login: Option<String>,
    pub head_sha: Sha,
    pub base_branch: String,
}

impl PullRequestEvent {
    /// The store row this event's snapshot corresponds to.
    pub fn to_record(&self) -> PullRequestRecord {
        PullRequestRecord {
            number: self.number,
            id: self.id,
            title: self.title.clone(),
            author_id: self.author_id,
            author_login: self.author_login.clone(),
            assignee_id: self.assignee_id,
            assignee_login: self.assignee_login.clone(),
            head_sha: self.head_sha.clone(),
            target_branch: self.base_branch.clone(),
        }
    }
}

/// An `issue_comment` creation event.
///
/// GitHub models PR comments as issue comments; `pr_number` is set only when
/// the comment is on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueCommentEvent {
    pub repo: RepoId,
    pub pr_number: Option<PrNumber>,
    pub body: String,
    pub commenter_id: UserId,
    pub commenter_login: String,
}
