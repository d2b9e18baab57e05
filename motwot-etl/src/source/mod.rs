//! Where upstream archives come from.

mod base;
pub mod local;

pub use base::UpstreamSource;
