use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, ScdResult};
use crate::table::HistorizedTable;
use crate::types::{HistorizedRow, MutationPlan, RecordKey};

/// Faults injected by a [`FaultyTable`].
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Number of upcoming commits that fail without writing anything.
    pub failed_commits: usize,
    /// Number of upcoming commits that are written but reported as failed.
    pub lost_acknowledgements: usize,
    /// Number of upcoming history reads that fail.
    pub failed_reads: usize,
    /// Delay applied before every commit, used to interleave concurrent writers.
    pub commit_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    faults: FaultConfig,
    commit_calls: u64,
    read_calls: u64,
}

/// Wraps a [`HistorizedTable`] and injects storage failures.
#[derive(Debug, Clone)]
pub struct FaultyTable<T> {
    wrapped: T,
    inner: Arc<Mutex<Inner>>,
}

impl<T> FaultyTable<T> {
    pub fn wrap(wrapped: T, faults: FaultConfig) -> Self {
        Self {
            wrapped,
            inner: Arc::new(Mutex::new(Inner {
                faults,
                ..Default::default()
            })),
        }
    }

    pub fn get_inner(&self) -> &T {
        &self.wrapped
    }

    /// Returns the number of commits attempted through the wrapper.
    pub async fn commit_calls(&self) -> u64 {
        self.inner.lock().await.commit_calls
    }

    pub async fn read_calls(&self) -> u64 {
        self.inner.lock().await.read_calls
    }
}

impl<T> HistorizedTable for FaultyTable<T>
where
    T: HistorizedTable + Sync,
{
    fn name(&self) -> &str {
        self.wrapped.name()
    }

    async fn read_history(&self, key: &RecordKey) -> ScdResult<Vec<HistorizedRow>> {
        let fail = {
            let mut inner = self.inner.lock().await;
            inner.read_calls += 1;
            take_one(&mut inner.faults.failed_reads)
        };

        if fail {
            bail!(
                ErrorKind::StorageReadFailed,
                "Injected read failure",
                format!("reading key {key}")
            );
        }

        self.wrapped.read_history(key).await
    }

    async fn commit(&self, plan: &MutationPlan) -> ScdResult<()> {
        let (fail, lose_acknowledgement, delay) = {
            let mut inner = self.inner.lock().await;
            inner.commit_calls += 1;
            let fail = take_one(&mut inner.faults.failed_commits);
            let lose_acknowledgement =
                !fail && take_one(&mut inner.faults.lost_acknowledgements);
            (fail, lose_acknowledgement, inner.faults.commit_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if fail {
            bail!(
                ErrorKind::StorageWriteFailed,
                "Injected write failure",
                format!("committing key {}", plan.key)
            );
        }

        self.wrapped.commit(plan).await?;

        if lose_acknowledgement {
            bail!(
                ErrorKind::StorageWriteFailed,
                "Injected lost acknowledgement",
                format!("key {} was committed", plan.key)
            );
        }

        Ok(())
    }
}

fn take_one(remaining: &mut usize) -> bool {
    if *remaining == 0 {
        return false;
    }
    *remaining -= 1;
    true
}
