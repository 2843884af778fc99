//! Durable PR metadata and review-score storage.
//!
//! The store is the source of truth the policy engine reads from. One SQLite
//! database holds every tracked repository, keyed by the repository full name
//! plus PR number; there is no per-repo table naming and therefore no name
//! sanitization to collide.

mod sqlite;

pub use sqlite::Store;

use thiserror::Error;

use crate::types::{PrNumber, RepoId, Sha, UserId};

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An existing PR row disagrees with incoming data on a field that must
    /// never change. This is a fatal integrity violation for the triggering
    /// request, not a normal business condition.
    #[error(
        "corrupted store: {field} changed for PR {number} in {repo} \
         (stored {stored:?}, incoming {incoming:?})"
    )]
    CorruptedRecord {
        repo: RepoId,
        number: PrNumber,
        field: &'static str,
        stored: String,
        incoming: String,
    },

    /// An underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be prepared.
    #[error("cannot prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    /// The database was written by a newer version of this program.
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    /// A blocking task running a statement panicked.
    #[error("store task panicked: {0}")]
    TaskPanicked(String),
}

/// A persisted pull request row.
///
/// `id`, `title`, `author_id` and `author_login` are immutable once set;
/// the assignee, head SHA and target branch track the latest event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRecord {
    pub number: PrNumber,
    /// GitHub's global PR id (distinct from the per-repo number).
    pub id: u64,
    pub title: String,
    pub author_id: UserId,
    pub author_login: String,
    pub assignee_id: Option<UserId>,
    pub assignee_login: Option<String>,
    pub head_sha: Sha,
    pub target_branch: String,
}

impl PullRequestRecord {
    /// Whether the PR author assigned the PR to themselves.
    pub fn is_self_assigned(&self) -> bool {
        self.assignee_id == Some(self.author_id)
    }
}

/// Columns exposed through the generic single-field lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrField {
    TargetBranch,
    AuthorLogin,
    AssigneeLogin,
    HeadSha,
}

impl PrField {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            PrField::TargetBranch => "target_branch",
            PrField::AuthorLogin => "author_login",
            PrField::AssigneeLogin => "assignee_login",
            PrField::HeadSha => "head_sha",
        }
    }
}
