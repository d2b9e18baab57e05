//! Configuration of the motwot binaries.
//!
//! The [`shared::RunnerConfig`] is loaded with [`load_config`] from a base file, an environment
//! specific file and `APP_` prefixed environment variables, and validated before it is returned.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{LoadConfigError, load_config, load_config_from};
