use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;
use crate::shared::base::require_non_empty;

/// The warehouse holding the authoritative table.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseConfig {
    /// An in-memory table that lives as long as the process, for dry runs.
    Memory,
    /// A BigQuery table.
    BigQuery {
        /// Google Cloud project identifier.
        project_id: String,
        /// BigQuery dataset identifier.
        dataset_id: String,
        /// Name of the authoritative table.
        table_id: String,
        /// Service account key for authenticating with BigQuery.
        service_account_key: SecretString,
    },
}

impl WarehouseConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            WarehouseConfig::Memory => Ok(()),
            WarehouseConfig::BigQuery {
                project_id,
                dataset_id,
                table_id,
                service_account_key,
            } => {
                require_non_empty("warehouse.big_query.project_id", project_id)?;
                require_non_empty("warehouse.big_query.dataset_id", dataset_id)?;
                require_non_empty("warehouse.big_query.table_id", table_id)?;
                require_non_empty(
                    "warehouse.big_query.service_account_key",
                    service_account_key.expose_secret(),
                )
            }
        }
    }
}

/// Same as [`WarehouseConfig`] but without secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseConfigWithoutSecrets {
    Memory,
    BigQuery {
        project_id: String,
        dataset_id: String,
        table_id: String,
    },
}

impl From<WarehouseConfig> for WarehouseConfigWithoutSecrets {
    fn from(value: WarehouseConfig) -> Self {
        match value {
            WarehouseConfig::Memory => WarehouseConfigWithoutSecrets::Memory,
            WarehouseConfig::BigQuery {
                project_id,
                dataset_id,
                table_id,
                ..
            } => WarehouseConfigWithoutSecrets::BigQuery {
                project_id,
                dataset_id,
                table_id,
            },
        }
    }
}
