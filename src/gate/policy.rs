//! Pure gating decision.
//!
//! Given a repository's policy, the stored PR row and the current assignee's
//! score, decide what status (if any) the PR earns. No I/O here; the engine
//! owns persistence and publication.

use crate::config::RepoPolicy;
use crate::store::PullRequestRecord;

/// The outcome of evaluating a PR against its repository policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The PR passes the gate.
    Success,
    /// The PR is blocked.
    Failure,
    /// The PR targets a branch the gate does not enforce; publish nothing.
    Skip,
}

/// Evaluates the gate for one PR.
///
/// The checks apply in a fixed order:
/// 1. A PR not targeting the protected branch gets no status at all.
/// 2. A bypass-listed author always passes.
/// 3. A self-assigned PR fails outright when the policy forbids
///    self-assignment.
/// 4. Otherwise the PR passes exactly when the current assignee's score is
///    positive. No assignee or no recorded verdict means a score of zero,
///    which fails.
pub fn evaluate(policy: &RepoPolicy, record: &PullRequestRecord, assignee_score: i64) -> Decision {
    if record.target_branch != policy.protected_branch {
        return Decision::Skip;
    }
    if policy.users_bypass.contains(&record.author_login) {
        return Decision::Success;
    }
    if !policy.with_self_assign && record.is_self_assigned() {
        return Decision::Failure;
    }
    if assignee_score > 0 {
        Decision::Success
    } else {
        Decision::Failure
    }
}
