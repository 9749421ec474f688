use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, ScdResult};
use crate::reconcile::validate_history;
use crate::table::HistorizedTable;
use crate::types::{HistorizedRow, Mutation, MutationPlan, Precondition, RecordKey};

#[derive(Debug)]
struct Inner {
    rows: BTreeMap<RecordKey, Vec<HistorizedRow>>,
    commits: u64,
}

/// In-memory historized table for testing and development purposes.
///
/// Commits are staged on a copy of the key's rows, checked against the history invariants and
/// swapped in under the table lock, which makes each commit atomic.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: Arc<str>,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTable {
    /// Creates a new empty table.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        let inner = Inner {
            rows: BTreeMap::new(),
            commits: 0,
        };

        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Stores `rows` as is, without checking them.
    ///
    /// Used to load existing history, including corrupt history in tests.
    pub async fn insert_rows(&self, rows: Vec<HistorizedRow>) {
        let mut inner = self.inner.lock().await;
        for row in rows {
            let history = inner.rows.entry(row.key.clone()).or_default();
            history.push(row);
            history.sort_by(|a, b| a.effective_start.total_cmp(&b.effective_start));
        }
    }

    /// Returns a copy of all rows, grouped by key.
    pub async fn rows(&self) -> BTreeMap<RecordKey, Vec<HistorizedRow>> {
        let inner = self.inner.lock().await;
        inner.rows.clone()
    }

    /// Returns the number of commits that wrote at least one row.
    pub async fn commits(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner.commits
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.rows.clear();
        inner.commits = 0;
    }
}

impl HistorizedTable for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_history(&self, key: &RecordKey) -> ScdResult<Vec<HistorizedRow>> {
        let inner = self.inner.lock().await;

        Ok(inner.rows.get(key).cloned().unwrap_or_default())
    }

    async fn commit(&self, plan: &MutationPlan) -> ScdResult<()> {
        let mut inner = self.inner.lock().await;

        let stored = inner.rows.get(&plan.key).map(Vec::as_slice).unwrap_or(&[]);
        let observed = Precondition::from_history(stored);
        if observed != plan.precondition {
            bail!(
                ErrorKind::ConcurrentModification,
                "History of the key changed since the plan was computed",
                format!(
                    "key {} expected {:?} but found {:?}",
                    plan.key, plan.precondition, observed
                )
            );
        }

        if plan.is_noop() {
            return Ok(());
        }

        let staged = stage_plan(stored, plan)?;
        validate_history(&plan.key, &staged)?;

        debug!(
            table = %self.name,
            key = %plan.key,
            rows = staged.len(),
            "committed mutation plan"
        );

        inner.rows.insert(plan.key.clone(), staged);
        inner.commits += 1;

        Ok(())
    }
}

/// Applies the writes of `plan` to a copy of `stored`.
fn stage_plan(stored: &[HistorizedRow], plan: &MutationPlan) -> ScdResult<Vec<HistorizedRow>> {
    let mut staged = stored.to_vec();

    for mutation in plan.writes() {
        match mutation {
            Mutation::OpenRow { row } => {
                if staged
                    .iter()
                    .any(|stored| stored.effective_start == row.effective_start)
                {
                    bail!(
                        ErrorKind::InvariantViolation,
                        "A row with the same effective start already exists",
                        format!("cannot open {row}")
                    );
                }
                staged.push(row.clone());
            }
            Mutation::CloseRow {
                effective_start,
                effective_end,
            } => {
                let Some(current) = staged
                    .iter_mut()
                    .find(|row| row.is_current && row.effective_start == *effective_start)
                else {
                    bail!(
                        ErrorKind::ConcurrentModification,
                        "Row to close is not current",
                        format!("key {} has no current row at {effective_start}", plan.key)
                    );
                };
                current.close(*effective_end);
            }
            Mutation::UpdateInPlace {
                effective_start,
                sequence,
                payload,
            } => {
                let Some(current) = staged
                    .iter_mut()
                    .find(|row| row.is_current && row.effective_start == *effective_start)
                else {
                    bail!(
                        ErrorKind::ConcurrentModification,
                        "Row to update is not current",
                        format!("key {} has no current row at {effective_start}", plan.key)
                    );
                };
                current.refresh(payload.clone(), *sequence);
            }
            Mutation::NoOp { .. } => {}
        }
    }

    staged.sort_by(|a, b| a.effective_start.total_cmp(&b.effective_start));

    Ok(staged)
}
