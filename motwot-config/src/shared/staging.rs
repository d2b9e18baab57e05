use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::shared::ValidationError;
use crate::shared::base::require_non_empty;

const fn default_write_buffer_bytes() -> usize {
    StagingConfig::DEFAULT_WRITE_BUFFER_BYTES
}

/// Where and how staged batches are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Directory holding staged batches and the run lock.
    pub dir: PathBuf,
    /// Keeps staged batches after a successful merge.
    #[serde(default)]
    pub keep_after_merge: bool,
    /// Size of the buffer in front of the staged file.
    #[serde(default = "default_write_buffer_bytes")]
    pub write_buffer_bytes: usize,
}

impl StagingConfig {
    pub const DEFAULT_WRITE_BUFFER_BYTES: usize = 1024 * 1024;

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("staging.dir", &self.dir.to_string_lossy())?;

        if self.write_buffer_bytes == 0 {
            return Err(ValidationError::WriteBufferBytesZero);
        }

        Ok(())
    }
}
