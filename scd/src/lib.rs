//! Materializes change data capture feeds into slowly changing dimension (type 2) tables.
//!
//! A batch of raw change records flows through the [`normalize::Normalizer`], is grouped and
//! ordered per key by the [`sequencer::Sequencer`], diffed against the stored history of each key
//! by the [`reconcile::HistoryReconciler`] and committed by the [`apply::MergeApplier`]. The
//! [`coordinator::BatchCoordinator`] drives these stages and processes keys concurrently.

pub mod apply;
pub mod coordinator;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod normalize;
pub mod reconcile;
pub mod sequencer;
pub mod store;
pub mod table;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
