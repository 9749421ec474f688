//! Configuration types and loading for the SCD2 materialization engine.
//!
//! The [`shared`] module holds the configuration structures consumed by the engine, while
//! [`load_config`] resolves them from configuration files and `APP_`-prefixed environment
//! variables.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
