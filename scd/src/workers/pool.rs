use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::{ErrorKind, ScdError, ScdResult};
use crate::scd_error;
use crate::types::RecordKey;
use crate::workers::key::KeyReport;

/// How a key task ended.
#[derive(Debug)]
pub enum KeyTaskOutcome {
    Completed(KeyReport),
    Failed(ScdError),
    /// The task did not start before the batch deadline and was skipped.
    Abandoned,
}

/// Pool running one task per key with bounded concurrency.
///
/// A task waits for a permit before starting. Once the optional deadline has passed, tasks that
/// have not started yet are abandoned while running tasks are left to finish, so a key is never
/// interrupted halfway through a commit.
#[derive(Debug)]
pub struct KeyWorkerPool {
    permits: Arc<Semaphore>,
    deadline: Option<Instant>,
    join_set: JoinSet<(RecordKey, KeyTaskOutcome)>,
    spawned: BTreeSet<RecordKey>,
}

impl KeyWorkerPool {
    /// Creates a pool running at most `max_concurrent_keys` tasks at once.
    pub fn new(max_concurrent_keys: usize, timeout: Option<Duration>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent_keys.max(1))),
            deadline: timeout.map(|timeout| Instant::now() + timeout),
            join_set: JoinSet::new(),
            spawned: BTreeSet::new(),
        }
    }

    /// Spawns the task of `key`.
    pub fn spawn<F>(&mut self, key: RecordKey, future: F)
    where
        F: Future<Output = ScdResult<KeyReport>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let deadline = self.deadline;
        self.spawned.insert(key.clone());

        self.join_set.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return (key, KeyTaskOutcome::Abandoned);
            };

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!(%key, "batch deadline passed before key started");
                return (key, KeyTaskOutcome::Abandoned);
            }

            // The key runs in its own task so that a panic is reported for this key only.
            let outcome = match tokio::spawn(future).await {
                Ok(Ok(report)) => KeyTaskOutcome::Completed(report),
                Ok(Err(err)) => KeyTaskOutcome::Failed(err),
                Err(join_err) => KeyTaskOutcome::Failed(scd_error!(
                    ErrorKind::KeyWorkerPanic,
                    "Key worker panicked",
                    join_err
                )),
            };

            (key, outcome)
        });
    }

    /// Waits for every spawned task and returns their outcomes in completion order.
    ///
    /// A key whose task could not be joined is reported as failed with
    /// [`ErrorKind::KeyWorkerPanic`], so every spawned key has exactly one outcome.
    pub async fn wait_all(mut self) -> Vec<(RecordKey, KeyTaskOutcome)> {
        let mut outcomes = Vec::with_capacity(self.join_set.len());
        let mut join_errors = Vec::new();

        while let Some(result) = self.join_set.join_next().await {
            match result {
                Ok((key, outcome)) => {
                    self.spawned.remove(&key);
                    outcomes.push((key, outcome));
                }
                Err(join_err) => {
                    error!(error = %join_err, "key task could not be joined");
                    join_errors.push(join_err.to_string());
                }
            }
        }

        // Tasks that failed to join do not return their key, the keys left over are theirs.
        let detail = join_errors.join("; ");
        for key in std::mem::take(&mut self.spawned) {
            let err = scd_error!(
                ErrorKind::KeyWorkerPanic,
                "Key task could not be joined",
                format!("key {key}: {detail}")
            );
            outcomes.push((key, KeyTaskOutcome::Failed(err)));
        }

        outcomes
    }
}
