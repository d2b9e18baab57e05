use serde::{Deserialize, Serialize};

use crate::shared::{
    MetricsConfig, StagingConfig, UpstreamConfig, UpstreamConfigWithoutSecrets, ValidationError,
    WarehouseConfig, WarehouseConfigWithoutSecrets,
};

/// Complete configuration of the runner binary.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Source of upstream archives.
    pub upstream: UpstreamConfig,
    /// Warehouse holding the authoritative table.
    pub warehouse: WarehouseConfig,
    /// Staging of batches between decoding and merging.
    pub staging: StagingConfig,
    /// Optional export of run metrics.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

impl RunnerConfig {
    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.upstream.validate()?;
        self.warehouse.validate()?;
        self.staging.validate()?;

        if let Some(metrics) = &self.metrics {
            metrics.validate()?;
        }

        Ok(())
    }
}

/// Same as [`RunnerConfig`] but without secrets.
///
/// This type implements [`Serialize`] because it does not contain secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfigWithoutSecrets {
    pub upstream: UpstreamConfigWithoutSecrets,
    pub warehouse: WarehouseConfigWithoutSecrets,
    pub staging: StagingConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

impl From<RunnerConfig> for RunnerConfigWithoutSecrets {
    fn from(value: RunnerConfig) -> Self {
        RunnerConfigWithoutSecrets {
            upstream: value.upstream.into(),
            warehouse: value.warehouse.into(),
            staging: value.staging,
            metrics: value.metrics,
        }
    }
}
