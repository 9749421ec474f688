//! Utilities for testing materialization scenarios.
//!
//! - [`record`] builds raw change records and a ready to use configuration.
//! - [`history`] asserts the history invariants over whole tables.
//! - [`faulty_table`] wraps a table to inject storage failures and delays.
//! - [`failpoints`] configures `fail` scenarios when the `failpoints` feature is enabled.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod faulty_table;
pub mod history;
pub mod record;
