//! Configuration types shared by the motwot crates.

mod base;
mod metrics;
mod runner;
mod staging;
mod upstream;
mod warehouse;

pub use base::ValidationError;
pub use metrics::MetricsConfig;
pub use runner::{RunnerConfig, RunnerConfigWithoutSecrets};
pub use staging::StagingConfig;
pub use upstream::{
    DEFAULT_MANIFEST_URL, DEFAULT_SCOPE, UpstreamConfig, UpstreamConfigWithoutSecrets,
};
pub use warehouse::{WarehouseConfig, WarehouseConfigWithoutSecrets};
