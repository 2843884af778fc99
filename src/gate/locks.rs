//! Per-PR access serialization.
//!
//! Concurrent webhook deliveries for the same PR must not interleave their
//! read-modify-publish sequences. Each (repo, PR number) pair gets an async
//! mutex; holding its guard is the permit to touch that PR's state. Deliveries
//! for different PRs proceed in parallel.
//!
//! The registry of repositories is fixed at startup from configuration. Lock
//! slots for individual PR numbers are created on demand and removed when the
//! last holder releases them, so the lock map does not grow with PR history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::{PrNumber, RepoId};

type SlotMap = Arc<StdMutex<HashMap<PrNumber, Arc<AsyncMutex<()>>>>>;

/// The repository is not in the configured set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("repository {0} is not tracked")]
pub struct UntrackedRepo(pub RepoId);

/// Startup-built registry of per-repo lock maps.
pub struct LockRegistry {
    repos: HashMap<RepoId, SlotMap>,
}

impl LockRegistry {
    /// Builds the registry for the given repositories. Locking a repository
    /// outside this set is an error, not an implicit registration.
    pub fn new<I>(repos: I) -> Self
    where
        I: IntoIterator<Item = RepoId>,
    {
        LockRegistry {
            repos: repos
                .into_iter()
                .map(|repo| (repo, Arc::new(StdMutex::new(HashMap::new()))))
                .collect(),
        }
    }

    /// Acquires exclusive access to a PR, waiting if another task holds it.
    ///
    /// The returned guard releases the PR on drop.
    pub async fn acquire(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<PrGuard, UntrackedRepo> {
        let slots = self
            .repos
            .get(repo)
            .ok_or_else(|| UntrackedRepo(repo.clone()))?;

        let slot = {
            let mut map = slots.lock().expect("lock slot map poisoned");
            Arc::clone(map.entry(number).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        };

        let guard = Arc::clone(&slot).lock_owned().await;

        Ok(PrGuard {
            guard: Some(guard),
            slot,
            slots: Arc::clone(slots),
            number,
        })
    }
}

/// Exclusive hold on one PR's state. Dropping it releases the PR and prunes
/// the slot if nobody else is waiting.
#[derive(Debug)]
pub struct PrGuard {
    guard: Option<OwnedMutexGuard<()>>,
    slot: Arc<AsyncMutex<()>>,
    slots: SlotMap,
    number: PrNumber,
}

impl Drop for PrGuard {
    fn drop(&mut self) {
        // Release before pruning so a waiter that wakes up still holds its
        // own clone of the slot and blocks removal.
        drop(self.guard.take());

        let mut map = self.slots.lock().expect("lock slot map poisoned");
        if let Some(current) = map.get(&self.number) {
            // Two counts mean the map entry and this guard are the only
            // holders; no task is waiting on the slot.
            if Arc::ptr_eq(current, &self.slot) && Arc::strong_count(&self.slot) == 2 {
                map.remove(&self.number);
            }
        }
    }
}
