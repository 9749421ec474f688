//! State kept by the engine between batches.
//!
//! Holds the identifiers of committed batches, used to process a batch at most once, and the keys
//! quarantined after their history was found corrupt.

mod base;
pub mod memory;

pub use base::{BatchClaim, StateStore};
