mod auth;
mod client;
mod manifest;
mod source;

pub use auth::{MotHistoryCredentials, TokenProvider};
pub use client::MotHistoryClient;
pub use manifest::{BulkDownloadManifest, ManifestEntry};
pub use source::MotHistorySource;
