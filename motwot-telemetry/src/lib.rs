//! Logging and metrics setup shared by the motwot binaries and tests.

pub mod metrics;
pub mod tracing;
