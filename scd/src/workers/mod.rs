//! Concurrent application of mutation plans, one worker per key.

pub mod key;
pub mod policy;
pub mod pool;
