//! Logging setup shared by the engine's binaries and tests.

pub mod tracing;
