use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::shared::ValidationError;
use crate::shared::base::{require_http_url, require_non_empty};

/// Bulk-download manifest endpoint of the MOT history trade API.
pub const DEFAULT_MANIFEST_URL: &str =
    "https://history.mot.api.gov.uk/v1/trade/vehicles/bulk-download";

/// OAuth scope granting access to the MOT history trade API.
pub const DEFAULT_SCOPE: &str = "https://tapi.dvsa.gov.uk/.default";

fn default_manifest_url() -> String {
    DEFAULT_MANIFEST_URL.to_owned()
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_owned()
}

/// Where upstream archives come from.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamConfig {
    /// The MOT history trade API.
    MotHistory {
        /// OAuth client id registered for the API.
        client_id: String,
        /// OAuth client secret.
        client_secret: SecretString,
        /// Token endpoint of the client-credentials grant.
        token_url: String,
        #[serde(default = "default_scope")]
        scope: String,
        /// Key sent in the `X-API-Key` header.
        api_key: SecretString,
        #[serde(default = "default_manifest_url")]
        manifest_url: String,
        /// Directory downloaded archives are stored in.
        download_dir: PathBuf,
    },
    /// Archives already present in a local directory.
    Local {
        dir: PathBuf,
    },
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            UpstreamConfig::MotHistory {
                client_id,
                client_secret,
                token_url,
                scope,
                api_key,
                manifest_url,
                download_dir,
            } => {
                require_non_empty("upstream.mot_history.client_id", client_id)?;
                require_non_empty(
                    "upstream.mot_history.client_secret",
                    client_secret.expose_secret(),
                )?;
                require_http_url("upstream.mot_history.token_url", token_url)?;
                require_non_empty("upstream.mot_history.scope", scope)?;
                require_non_empty("upstream.mot_history.api_key", api_key.expose_secret())?;
                require_http_url("upstream.mot_history.manifest_url", manifest_url)?;
                require_non_empty(
                    "upstream.mot_history.download_dir",
                    &download_dir.to_string_lossy(),
                )
            }
            UpstreamConfig::Local { dir } => {
                require_non_empty("upstream.local.dir", &dir.to_string_lossy())
            }
        }
    }
}

/// Same as [`UpstreamConfig`] but without secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamConfigWithoutSecrets {
    MotHistory {
        client_id: String,
        token_url: String,
        scope: String,
        manifest_url: String,
        download_dir: PathBuf,
    },
    Local {
        dir: PathBuf,
    },
}

impl From<UpstreamConfig> for UpstreamConfigWithoutSecrets {
    fn from(value: UpstreamConfig) -> Self {
        match value {
            UpstreamConfig::MotHistory {
                client_id,
                token_url,
                scope,
                manifest_url,
                download_dir,
                ..
            } => UpstreamConfigWithoutSecrets::MotHistory {
                client_id,
                token_url,
                scope,
                manifest_url,
                download_dir,
            },
            UpstreamConfig::Local { dir } => UpstreamConfigWithoutSecrets::Local { dir },
        }
    }
}
