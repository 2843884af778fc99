//! Periodic reconciliation against GitHub.
//!
//! Webhook deliveries can be lost (downtime, GitHub outages). Every
//! `poll_interval_secs` the poller lists the open PRs of each tracked
//! repository and hands them to the gate's reconcile path, so stored state
//! and published statuses converge on reality even without webhooks. The
//! reconcile path only publishes when the stored row actually changed;
//! sweeps over a quiet repository cost listing calls, not status posts.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::gate::ReviewGate;
use crate::github::{PullRequestSource, RemotePullRequest, StatusPublisher};
use crate::types::RepoId;
use crate::webhooks::{PrAction, PullRequestEvent};

/// The reconciliation loop.
pub struct Poller<P, S> {
    gate: Arc<ReviewGate<P>>,
    source: S,
    config: Arc<Config>,
    shutdown: CancellationToken,
}

impl<P: StatusPublisher, S: PullRequestSource> Poller<P, S> {
    pub fn new(
        gate: Arc<ReviewGate<P>>,
        source: S,
        config: Arc<Config>,
        shutdown: CancellationToken,
    ) -> Self {
        Poller {
            gate,
            source,
            config,
            shutdown,
        }
    }

    /// Runs sweeps until the shutdown token fires. The first sweep happens
    /// immediately so a restarted process catches up without waiting a full
    /// interval.
    pub async fn run(self) {
        let period = std::time::Duration::from_secs(self.config.poll_interval_secs);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("poller shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Runs one reconciliation pass over every tracked repository.
    ///
    /// Failures are logged per repository and per PR; one broken repo never
    /// stops the others from reconciling.
    pub async fn sweep(&self) {
        for repo in self.config.repos.keys() {
            let prs = match self.source.list_open_prs(repo).await {
                Ok(prs) => prs,
                Err(e) => {
                    warn!(repo = %repo, error = %e, "listing open PRs failed");
                    continue;
                }
            };

            debug!(repo = %repo, open_prs = prs.len(), "reconciling repository");
            for pr in prs {
                let event = synthetic_sync(repo.clone(), pr);
                if let Err(e) = self.gate.reconcile(&event).await {
                    warn!(repo = %repo, error = %e, "reconciliation of PR failed");
                }
            }
        }
    }
}

/// Shapes a listed PR as the `synchronize` snapshot it is equivalent to.
fn synthetic_sync(repo: RepoId, pr: RemotePullRequest) -> PullRequestEvent {
    PullRequestEvent {
        repo,
        action: PrAction::Synchronize,
        number: pr.number,
        id: pr.id,
        title: pr.title,
        author_id: pr.author_id,
        author_login: pr.author_login,
        assignee_id: pr.assignee_id,
        assignee_login: pr.assignee_login,
        head_sha: pr.head_sha,
        base_branch: pr.base_ref,
    }
}
