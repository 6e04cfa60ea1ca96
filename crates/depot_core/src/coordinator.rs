//! Coalesces concurrent update requests per repository.
//!
//! Each repository has a current *round*. Callers join the current round;
//! the first one to join schedules the work on a background task. When the
//! task is allowed to run (the previous round for the repository has
//! finished), it swaps in a fresh round so that anyone arriving from then on
//! waits for the next run. Every caller of a round observes that round's
//! result. A caller that gives up returns early without aborting the work
//! for the others. A repository's state is dropped once a round finishes
//! with nobody queued behind it.

use crate::error::{DepotError, Result};
use crate::repo_dir::RepoName;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type RoundResult = std::result::Result<(), Arc<DepotError>>;

struct Round {
    /// Set by the caller that schedules this round's work.
    claimed: AtomicBool,
    result: watch::Sender<Option<RoundResult>>,
}

impl Round {
    fn new() -> Arc<Self> {
        let (result, _) = watch::channel(None);
        Arc::new(Self {
            claimed: AtomicBool::new(false),
            result,
        })
    }

    fn finish(&self, result: RoundResult) {
        self.result.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
    }
}

struct Entry {
    round: Arc<Round>,
    exec: Arc<tokio::sync::Mutex<()>>,
}

impl Entry {
    fn new() -> Self {
        Self {
            round: Round::new(),
            exec: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

/// Finishes the round with an error if the work never reported back
/// (e.g. it panicked).
struct FinishOnDrop {
    round: Arc<Round>,
    repo: RepoName,
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.round.finish(Err(Arc::new(DepotError::UpdateAborted(self.repo.to_string()))));
    }
}

/// Per-repository coalescing of background operations.
#[derive(Clone, Default)]
pub struct UpdateCoordinator {
    entries: Arc<Mutex<HashMap<RepoName, Entry>>>,
}

impl UpdateCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` for `repo` unless a not-yet-started run is already scheduled,
    /// in which case this call joins it. Returns the run's result annotated
    /// with the repository, or [`DepotError::Canceled`] if `cancel` fires
    /// first.
    pub async fn run_exclusive_coalesced<F, Fut>(
        &self,
        repo: &RepoName,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (round, exec) = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(repo.clone()).or_insert_with(Entry::new);
            (entry.round.clone(), entry.exec.clone())
        };
        let mut rx = round.result.subscribe();

        if !round.claimed.swap(true, Ordering::AcqRel) {
            let entries = self.entries.clone();
            let repo = repo.clone();
            let round = round.clone();
            tokio::spawn(async move {
                let guard = FinishOnDrop {
                    round: round.clone(),
                    repo: repo.clone(),
                };
                let _running = exec.lock_owned().await;

                // the round has started; later callers wait for the next one
                if let Some(entry) = entries.lock().get_mut(&repo) {
                    if Arc::ptr_eq(&entry.round, &round) {
                        entry.round = Round::new();
                    }
                }

                debug!(repo = %repo, "starting coalesced update");
                let result = f().await.map_err(Arc::new);
                round.finish(result);

                // callers clone the round under this lock, so a count of one
                // means nobody joined the next round
                let mut map = entries.lock();
                let idle = map.get(&repo).is_some_and(|e| {
                    Arc::strong_count(&e.round) == 1 && !e.round.claimed.load(Ordering::Acquire)
                });
                if idle {
                    map.remove(&repo);
                }
                drop(map);
                drop(guard);
            });
        }

        let wait = async {
            match rx.wait_for(|r| r.is_some()).await {
                Ok(r) => r.clone().unwrap_or(Ok(())),
                Err(_) => Err(Arc::new(DepotError::UpdateAborted(repo.to_string()))),
            }
        };

        tokio::select! {
            result = wait => result.map_err(|source| DepotError::Update {
                repo: repo.to_string(),
                source,
            }),
            _ = cancel.cancelled() => Err(DepotError::Canceled),
        }
    }

    /// Number of repositories with coordination state.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
