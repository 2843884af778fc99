//! The review gate engine.
//!
//! One entry point, [`ReviewGate::handle_event`], takes a typed webhook event
//! through the full sequence: policy lookup, per-PR lock acquisition,
//! persistence, evaluation, and status publication. The pending status goes
//! out before state is persisted, so an observer always sees the gate working
//! on a commit before its verdict lands.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, RepoPolicy};
use crate::github::{GitHubApiError, StatusPublisher};
use crate::store::{Store, StoreError};
use crate::types::{ReviewScore, StatusState};
use crate::webhooks::{GitHubEvent, IssueCommentEvent, PullRequestEvent};

use super::locks::LockRegistry;
use super::policy::{Decision, evaluate};

/// Errors that fail a delivery.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] GitHubApiError),
}

/// What handling an event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The gate evaluated the PR and published this final state.
    Published(StatusState),
    /// The PR targets a branch the gate does not enforce; nothing published.
    SkippedBranch,
    /// The event's action has no effect on the gate.
    Ignored,
    /// The stored row already matched; the poll path publishes nothing.
    Unchanged,
    /// The event belongs to a repository outside the configured set.
    UntrackedRepo,
    /// A comment for a PR the store has never seen.
    UnknownPr,
}

/// The engine. Generic over the publisher so tests can observe publications
/// without a network.
pub struct ReviewGate<P> {
    config: Arc<Config>,
    store: Store,
    locks: LockRegistry,
    publisher: P,
}

impl<P: StatusPublisher> ReviewGate<P> {
    /// Builds the gate, deriving the lock registry from the configured
    /// repository set.
    pub fn new(config: Arc<Config>, store: Store, publisher: P) -> Self {
        let locks = LockRegistry::new(config.repos.keys().cloned());
        ReviewGate {
            config,
            store,
            locks,
            publisher,
        }
    }

    /// Handles one webhook delivery end to end.
    pub async fn handle_event(&self, event: &GitHubEvent) -> Result<Outcome, GateError> {
        let repo = event.repo();
        let Some(policy) = self.config.policy(repo) else {
            warn!(repo = %repo, kind = event.kind(), "event for untracked repository ignored");
            return Ok(Outcome::UntrackedRepo);
        };

        match event {
            GitHubEvent::PullRequest(e) => self.sync_pull_request(policy, e).await,
            GitHubEvent::IssueComment(e) => self.record_comment(policy, e).await,
        }
    }

    /// Refreshes a PR from a `pull_request` event and republishes its status.
    async fn sync_pull_request(
        &self,
        policy: &RepoPolicy,
        event: &PullRequestEvent,
    ) -> Result<Outcome, GateError> {
        if !event.action.affects_gate() {
            debug!(repo = %event.repo, pr = %event.number, action = ?event.action,
                "action has no gate effect");
            return Ok(Outcome::Ignored);
        }

        let _guard = self
            .locks
            .acquire(&event.repo, event.number)
            .await
            .expect("lock registry is built from the configured repository set");

        // A PR targeting an unenforced branch is persisted but never gets a
        // status, not even pending.
        if event.base_branch != policy.protected_branch {
            self.store
                .upsert_pull_request(&event.repo, event.to_record())
                .await?;
            debug!(repo = %event.repo, pr = %event.number, branch = %event.base_branch,
                "branch not enforced, no status published");
            return Ok(Outcome::SkippedBranch);
        }

        self.publisher
            .publish(&event.repo, &event.head_sha, StatusState::Pending)
            .await?;

        self.store
            .upsert_pull_request(&event.repo, event.to_record())
            .await?;

        let score = self.store.assignee_score(&event.repo, event.number).await?;
        // The event snapshot is the current truth for everything but the
        // score; the status goes to the event's head commit.
        let state = match evaluate(policy, &event.to_record(), score) {
            Decision::Success => StatusState::Success,
            Decision::Failure => StatusState::Failure,
            Decision::Skip => return Ok(Outcome::SkippedBranch),
        };

        self.publisher
            .publish(&event.repo, &event.head_sha, state)
            .await?;

        info!(repo = %event.repo, pr = %event.number, sha = %event.head_sha.short(),
            score, state = %state, "pull request synced");
        Ok(Outcome::Published(state))
    }

    /// Handles a PR comment: records the verdict if the body carries one,
    /// then republishes the status of the PR's stored head commit. Comments
    /// without a verdict still trigger a republish of the current decision.
    async fn record_comment(
        &self,
        policy: &RepoPolicy,
        event: &IssueCommentEvent,
    ) -> Result<Outcome, GateError> {
        let Some(number) = event.pr_number else {
            debug!(repo = %event.repo, "comment on plain issue ignored");
            return Ok(Outcome::Ignored);
        };

        let _guard = self
            .locks
            .acquire(&event.repo, number)
            .await
            .expect("lock registry is built from the configured repository set");

        let Some(record) = self.store.get_record(&event.repo, number).await? else {
            warn!(repo = %event.repo, pr = %number, "comment for unknown PR ignored");
            return Ok(Outcome::UnknownPr);
        };

        let verdict = ReviewScore::parse(&event.body);

        if record.target_branch != policy.protected_branch {
            // Still record a verdict so it counts if the PR is ever
            // retargeted at the enforced branch.
            if let Some(score) = verdict {
                self.store
                    .upsert_review(&event.repo, number, event.commenter_id, score)
                    .await?;
            }
            return Ok(Outcome::SkippedBranch);
        }

        self.publisher
            .publish(&event.repo, &record.head_sha, StatusState::Pending)
            .await?;

        if let Some(score) = verdict {
            self.store
                .upsert_review(&event.repo, number, event.commenter_id, score)
                .await?;
        }

        let assignee_score = self.store.assignee_score(&event.repo, number).await?;
        let state = match evaluate(policy, &record, assignee_score) {
            Decision::Success => StatusState::Success,
            Decision::Failure => StatusState::Failure,
            Decision::Skip => return Ok(Outcome::SkippedBranch),
        };

        self.publisher
            .publish(&event.repo, &record.head_sha, state)
            .await?;

        info!(repo = %event.repo, pr = %number, commenter = %event.commenter_login,
            verdict = ?verdict, assignee_score, state = %state, "comment handled");
        Ok(Outcome::Published(state))
    }

    /// Refreshes a PR from a poll listing.
    ///
    /// Unlike the webhook path no pending status goes out, and nothing is
    /// published when the stored row is already current, so periodic sweeps
    /// over many open PRs do not spend API quota on no-op statuses.
    pub async fn reconcile(&self, event: &PullRequestEvent) -> Result<Outcome, GateError> {
        let Some(policy) = self.config.policy(&event.repo) else {
            warn!(repo = %event.repo, "reconciliation of untracked repository skipped");
            return Ok(Outcome::UntrackedRepo);
        };

        let _guard = self
            .locks
            .acquire(&event.repo, event.number)
            .await
            .expect("lock registry is built from the configured repository set");

        if event.base_branch != policy.protected_branch {
            self.store
                .upsert_pull_request(&event.repo, event.to_record())
                .await?;
            return Ok(Outcome::SkippedBranch);
        }

        let changed = self
            .store
            .upsert_pull_request(&event.repo, event.to_record())
            .await?;
        if !changed {
            debug!(repo = %event.repo, pr = %event.number, "stored state already current");
            return Ok(Outcome::Unchanged);
        }

        let score = self.store.assignee_score(&event.repo, event.number).await?;
        let state = match evaluate(policy, &event.to_record(), score) {
            Decision::Success => StatusState::Success,
            Decision::Failure => StatusState::Failure,
            Decision::Skip => return Ok(Outcome::SkippedBranch),
        };

        self.publisher
            .publish(&event.repo, &event.head_sha, state)
            .await?;

        info!(repo = %event.repo, pr = %event.number, sha = %event.head_sha.short(),
            score, state = %state, "pull request reconciled");
        Ok(Outcome::Published(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::types::{PrNumber, RepoId, Sha, UserId};
    use crate::webhooks::PrAction;

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        published: Arc<StdMutex<Vec<(RepoId, Sha, StatusState)>>>,
    }

    impl RecordingPublisher {
        fn published(&self) -> Vec<(RepoId, Sha, StatusState)> {
            self.published.lock().unwrap().clone()
        }

        fn last_state(&self) -> Option<StatusState> {
            self.published.lock().unwrap().last().map(|(_, _, s)| *s)
        }

        fn clear(&self) {
            self.published.lock().unwrap().clear();
        }
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

    fn repo() -> RepoId {
        RepoId::new("org", "app")
    }

    fn config_with(policy: RepoPolicy) -> Arc<Config> {
        let mut repos = HashMap::new();
        repos.insert(repo(), policy);
        Arc::new(Config {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_path: PathBuf::from(":memory:"),
            webhook_secret: b"secret".to_vec(),
            poll_interval_secs: 60,
            github_token: "token".to_string(),
            repos,
        })
    }

    fn gate(policy: RepoPolicy) -> (ReviewGate<RecordingPublisher>, RecordingPublisher) {
        let publisher = RecordingPublisher::default();
        let store = Store::open_in_memory().unwrap();
        let gate = ReviewGate::new(config_with(policy), store, publisher.clone());
        (gate, publisher)
    }

    fn pr_event(action: PrAction, assignee: Option<(u64, &str)>, sha: &str) -> GitHubEvent {
        GitHubEvent::PullRequest(PullRequestEvent {
            repo: repo(),
            action,
            number: PrNumber(42),
            id: 1042,
            title: "add feature".to_string(),
            author_id: UserId(1),
            author_login: "bob".to_string(),
            assignee_id: assignee.map(|(id, _)| UserId(id)),
            assignee_login: assignee.map(|(_, login)| login.to_string()),
            head_sha: Sha::new(sha),
            base_branch: "master".to_string(),
        })
    }

    fn comment_event(commenter: (u64, &str), body: &str) -> GitHubEvent {
        GitHubEvent::IssueComment(IssueCommentEvent {
            repo: repo(),
            pr_number: Some(PrNumber(42)),
            body: body.to_string(),
            commenter_id: UserId(commenter.0),
            commenter_login: commenter.1.to_string(),
        })
    }

    #[tokio::test]
    async fn full_review_cycle() {
        let (gate, publisher) = gate(RepoPolicy::default());

        // Opened without an assignee: pending then failure.
        let outcome = gate
            .handle_event(&pr_event(PrAction::Opened, None, "sha-1"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Published(StatusState::Failure));
        assert_eq!(
            publisher.published(),
            vec![
                (repo(), Sha::new("sha-1"), StatusState::Pending),
                (repo(), Sha::new("sha-1"), StatusState::Failure),
            ]
        );
        publisher.clear();

        // Assigning alice alone does not pass the gate.
        let outcome = gate
            .handle_event(&pr_event(PrAction::Assigned, Some((2, "alice")), "sha-1"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Published(StatusState::Failure));
        publisher.clear();

        // Alice approves.
        let outcome = gate.handle_event(&comment_event((2, "alice"), "+1")).await.unwrap();
        assert_eq!(outcome, Outcome::Published(StatusState::Success));
        assert_eq!(publisher.last_state(), Some(StatusState::Success));
        publisher.clear();

        // A push moves the head; the verdict persists and the new commit
        // gets the status.
        let outcome = gate
            .handle_event(&pr_event(PrAction::Synchronize, Some((2, "alice")), "sha-2"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Published(StatusState::Success));
        assert_eq!(
            publisher.published(),
            vec![
                (repo(), Sha::new("sha-2"), StatusState::Pending),
                (repo(), Sha::new("sha-2"), StatusState::Success),
            ]
        );
        publisher.clear();

        // Alice changes her mind.
        let outcome = gate.handle_event(&comment_event((2, "alice"), "-1")).await.unwrap();
        assert_eq!(outcome, Outcome::Published(StatusState::Failure));
    }

    #[tokio::test]
    async fn non_assignee_verdict_is_stored_but_invisible() {
        let (gate, publisher) = gate(RepoPolicy::default());

        gate.handle_event(&pr_event(PrAction::Opened, Some((2, "alice")), "sha-1"))
            .await
            .unwrap();
        publisher.clear();

        // Carol is not the assignee; her approval does not pass the gate.
        let outcome = gate.handle_event(&comment_event((7, "carol"), "+1")).await.unwrap();
        assert_eq!(outcome, Outcome::Published(StatusState::Failure));
        publisher.clear();

        // Reassigning to carol makes her stored verdict count.
        let outcome = gate
            .handle_event(&pr_event(PrAction::Assigned, Some((7, "carol")), "sha-1"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Published(StatusState::Success));
    }

    #[tokio::test]
    async fn non_verdict_comment_republishes_current_state() {
        let (gate, publisher) = gate(RepoPolicy::default());

        gate.handle_event(&pr_event(PrAction::Opened, Some((2, "alice")), "sha-1"))
            .await
            .unwrap();
        gate.handle_event(&comment_event((2, "alice"), "+1")).await.unwrap();
        publisher.clear();

        // Bodies that are not an exact +1/-1 record nothing, but the gate
        // still reconfirms the current decision on the stored head.
        for body in ["LGTM", "+1 ", "looks good, +1", "+2", ""] {
            let outcome = gate.handle_event(&comment_event((2, "alice"), body)).await.unwrap();
            assert_eq!(
                outcome,
                Outcome::Published(StatusState::Success),
                "body {body:?}"
            );
        }
        assert_eq!(publisher.published().len(), 10);
        assert_eq!(publisher.last_state(), Some(StatusState::Success));
    }

    #[tokio::test]
    async fn comment_on_plain_issue_is_ignored() {
        let (gate, publisher) = gate(RepoPolicy::default());

        let event = GitHubEvent::IssueComment(IssueCommentEvent {
            repo: repo(),
            pr_number: None,
            body: "+1".to_string(),
            commenter_id: UserId(2),
            commenter_login: "alice".to_string(),
        });
        let outcome = gate.handle_event(&event).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn verdict_for_unknown_pr_is_ignored() {
        let (gate, publisher) = gate(RepoPolicy::default());

        let outcome = gate.handle_event(&comment_event((2, "alice"), "+1")).await.unwrap();
        assert_eq!(outcome, Outcome::UnknownPr);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn untracked_repo_is_ignored() {
        let (gate, publisher) = gate(RepoPolicy::default());

        let mut event = pr_event(PrAction::Opened, None, "sha-1");
        if let GitHubEvent::PullRequest(e) = &mut event {
            e.repo = RepoId::new("other", "repo");
        }
        let outcome = gate.handle_event(&event).await.unwrap();
        assert_eq!(outcome, Outcome::UntrackedRepo);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn closed_and_label_actions_are_ignored() {
        let (gate, publisher) = gate(RepoPolicy::default());

        for action in [PrAction::Closed, PrAction::Labeled, PrAction::Unlabeled] {
            let outcome = gate
                .handle_event(&pr_event(action, None, "sha-1"))
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::Ignored, "action {action:?}");
        }
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn unenforced_branch_gets_no_status() {
        let (gate, publisher) = gate(RepoPolicy::default());

        let mut event = pr_event(PrAction::Opened, Some((2, "alice")), "sha-1");
        if let GitHubEvent::PullRequest(e) = &mut event {
            e.base_branch = "develop".to_string();
        }
        let outcome = gate.handle_event(&event).await.unwrap();
        assert_eq!(outcome, Outcome::SkippedBranch);
        assert!(publisher.published().is_empty());

        // A verdict on the skipped PR is recorded but publishes nothing.
        let outcome = gate.handle_event(&comment_event((2, "alice"), "+1")).await.unwrap();
        assert_eq!(outcome, Outcome::SkippedBranch);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn bypass_author_passes_without_review() {
        let mut policy = RepoPolicy::default();
        policy.users_bypass.insert("bob".to_string());
        let (gate, publisher) = gate(policy);

        let outcome = gate
            .handle_event(&pr_event(PrAction::Opened, None, "sha-1"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Published(StatusState::Success));
        assert_eq!(publisher.last_state(), Some(StatusState::Success));
    }

    #[tokio::test]
    async fn self_assignment_policy_is_enforced() {
        // Author bob assigns himself and approves his own PR.
        let run = |with_self_assign: bool| async move {
            let mut policy = RepoPolicy::default();
            policy.with_self_assign = with_self_assign;
            let (gate, publisher) = gate(policy);

            gate.handle_event(&pr_event(PrAction::Opened, Some((1, "bob")), "sha-1"))
                .await
                .unwrap();
            gate.handle_event(&comment_event((1, "bob"), "+1")).await.unwrap();
            publisher.last_state()
        };

        assert_eq!(run(true).await, Some(StatusState::Success));
        assert_eq!(run(false).await, Some(StatusState::Failure));
    }

    #[tokio::test]
    async fn redelivered_event_is_idempotent() {
        let (gate, publisher) = gate(RepoPolicy::default());

        let event = pr_event(PrAction::Opened, Some((2, "alice")), "sha-1");
        let first = gate.handle_event(&event).await.unwrap();
        let second = gate.handle_event(&event).await.unwrap();

        assert_eq!(first, second);
        // Both deliveries publish; the stored row is untouched by the second.
        assert_eq!(publisher.published().len(), 4);
    }

    #[tokio::test]
    async fn reconciliation_publishes_only_on_change() {
        let (gate, publisher) = gate(RepoPolicy::default());

        let GitHubEvent::PullRequest(listed) =
            pr_event(PrAction::Synchronize, Some((2, "alice")), "sha-1")
        else {
            unreachable!()
        };

        // A newly seen PR gets its final state, with no pending.
        let outcome = gate.reconcile(&listed).await.unwrap();
        assert_eq!(outcome, Outcome::Published(StatusState::Failure));
        assert_eq!(
            publisher.published(),
            vec![(repo(), Sha::new("sha-1"), StatusState::Failure)]
        );
        publisher.clear();

        // An unchanged listing publishes nothing at all.
        let outcome = gate.reconcile(&listed).await.unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
        assert!(publisher.published().is_empty());

        // A reassignment is a change and earns a fresh status.
        let GitHubEvent::PullRequest(reassigned) =
            pr_event(PrAction::Synchronize, Some((7, "carol")), "sha-1")
        else {
            unreachable!()
        };
        let outcome = gate.reconcile(&reassigned).await.unwrap();
        assert_eq!(outcome, Outcome::Published(StatusState::Failure));
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn corrupted_record_fails_the_delivery() {
        let (gate, _publisher) = gate(RepoPolicy::default());

        gate.handle_event(&pr_event(PrAction::Opened, None, "sha-1"))
            .await
            .unwrap();

        let mut event = pr_event(PrAction::Opened, None, "sha-1");
        if let GitHubEvent::PullRequest(e) = &mut event {
            e.author_id = UserId(99);
        }
        let err = gate.handle_event(&event).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::Store(StoreError::CorruptedRecord { field: "author_id", .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_deliveries_for_one_pr_serialize() {
        let (gate, publisher) = gate(RepoPolicy::default());
        let gate = Arc::new(gate);

        let mut tasks = Vec::new();
        for i in 0..8u64 {
            let gate = Arc::clone(&gate);
            tasks.push(tokio::spawn(async move {
                let sha = format!("sha-{i}");
                gate.handle_event(&pr_event(PrAction::Synchronize, Some((2, "alice")), &sha))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Each delivery's pending/final pair is adjacent: deliveries never
        // interleave their publications.
        let published = publisher.published();
        assert_eq!(published.len(), 16);
        for pair in published.chunks(2) {
            assert_eq!(pair[0].1, pair[1].1, "publications interleaved across deliveries");
            assert_eq!(pair[0].2, StatusState::Pending);
        }
    }
}
