//! Common types used throughout the engine.
//!
//! Holds the value model (cells, keys and sequences), the change records flowing into the engine,
//! the historized rows of the target table and the mutations computed between them.

mod cell;
mod key;
mod mutation;
mod record;
mod row;
mod sequence;

pub use cell::*;
pub use key::*;
pub use mutation::*;
pub use record::*;
pub use row::*;
pub use sequence::*;

/// Identifier of a batch handed to the coordinator.
pub type BatchId = String;
