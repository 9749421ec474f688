//! Storage abstractions for the historized target table.
//!
//! The [`HistorizedTable`] trait is the only way the engine reads or writes historized rows.
//! Every commit is conditional on the state the plan was computed against.

mod base;
pub mod memory;

pub use base::HistorizedTable;
