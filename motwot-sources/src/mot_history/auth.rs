use motwot_etl::error::{ErrorKind, EtlResult};
use motwot_etl::{bail, etl_error};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tokens are refreshed this long before they expire.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Credentials of the client-credentials grant protecting the API.
#[derive(Debug, Clone)]
pub struct MotHistoryCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub token_url: String,
    pub scope: String,
    /// Key sent in the `X-API-Key` header next to the bearer token.
    pub api_key: SecretString,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: SecretString,
    refresh_at: Instant,
}

/// Obtains bearer tokens and caches them until shortly before they expire.
pub struct TokenProvider {
    http: reqwest::Client,
    credentials: MotHistoryCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, credentials: MotHistoryCredentials) -> Self {
        Self {
            http,
            credentials,
            cached: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &MotHistoryCredentials {
        &self.credentials
    }

    /// Returns a valid access token, requesting a new one when the cached token is about to
    /// expire.
    pub async fn access_token(&self) -> EtlResult<SecretString> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                debug!("using cached access token");
                return Ok(token.token.clone());
            }
        }

        let response = self.request_token().await?;
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(0));
        let token = SecretString::new(response.access_token);

        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_at: refresh_deadline(Instant::now(), lifetime),
        });

        info!(expires_in = lifetime.as_secs(), "access token acquired");

        Ok(token)
    }

    /// Drops the cached token so that the next call requests a fresh one.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn request_token(&self) -> EtlResult<TokenResponse> {
        let credentials = &self.credentials;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose_secret().as_str()),
            ("scope", credentials.scope.as_str()),
        ];

        let response = self
            .http
            .post(&credentials.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| {
                etl_error!(
                    ErrorKind::UpstreamUnavailable,
                    "Token endpoint could not be reached",
                    err.to_string(),
                    source: err
                )
            })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                ErrorKind::AuthenticationError,
                "Token request was rejected",
                format!("status {status}: {body}")
            );
        }
        if !status.is_success() {
            bail!(
                ErrorKind::UpstreamUnavailable,
                "Token endpoint returned an error",
                format!("status {status}")
            );
        }

        response.json().await.map_err(|err| {
            etl_error!(
                ErrorKind::AuthenticationError,
                "Token response could not be parsed",
                err.to_string(),
                source: err
            )
        })
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("client_id", &self.credentials.client_id)
            .field("token_url", &self.credentials.token_url)
            .finish_non_exhaustive()
    }
}

/// Instant from which a token obtained at `now` with `lifetime` is no longer handed out.
fn refresh_deadline(now: Instant, lifetime: Duration) -> Instant {
    now + lifetime.saturating_sub(EXPIRY_BUFFER)
}
