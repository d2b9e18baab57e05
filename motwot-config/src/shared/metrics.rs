use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::shared::ValidationError;
use crate::shared::base::require_non_empty;

/// Export of run metrics.
///
/// Runs are short lived, so instead of serving a scrape endpoint the metrics are rendered into a
/// file in the Prometheus text format once the run finishes, ready for a node exporter textfile
/// collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// File the rendered metrics are written to.
    pub textfile_path: PathBuf,
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("metrics.textfile_path", &self.textfile_path.to_string_lossy())
    }
}
