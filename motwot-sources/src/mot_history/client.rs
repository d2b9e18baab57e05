use motwot_etl::error::{ErrorKind, EtlError, EtlResult};
use motwot_etl::{bail, etl_error};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::mot_history::auth::{MotHistoryCredentials, TokenProvider};
use crate::mot_history::manifest::{BulkDownloadManifest, ManifestEntry};

const API_KEY_HEADER: &str = "x-api-key";

/// Client of the bulk-download part of the MOT history trade API.
#[derive(Debug)]
pub struct MotHistoryClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    manifest_url: String,
    download_dir: PathBuf,
}

impl MotHistoryClient {
    pub fn new(
        credentials: MotHistoryCredentials,
        manifest_url: impl Into<String>,
        download_dir: impl Into<PathBuf>,
    ) -> EtlResult<Self> {
        let http = reqwest::Client::builder().build().map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "HTTP client could not be created",
                err.to_string(),
                source: err
            )
        })?;

        Ok(Self {
            tokens: TokenProvider::new(http.clone(), credentials),
            http,
            manifest_url: manifest_url.into(),
            download_dir: download_dir.into(),
        })
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Fetches the list of published archives.
    ///
    /// A rejected token is refreshed and the request retried once.
    pub async fn manifest(&self) -> EtlResult<BulkDownloadManifest> {
        let mut response = self.request_manifest().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("manifest request unauthorized, refreshing the access token");
            self.tokens.invalidate().await;
            response = self.request_manifest().await?;
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            bail!(
                ErrorKind::AuthenticationError,
                "Bulk download manifest was refused",
                format!("status {status}")
            );
        }
        if !status.is_success() {
            bail!(
                ErrorKind::UpstreamUnavailable,
                "Bulk download manifest could not be fetched",
                format!("status {status}")
            );
        }

        let manifest: BulkDownloadManifest = response.json().await.map_err(|err| {
            etl_error!(
                ErrorKind::UpstreamUnavailable,
                "Bulk download manifest could not be parsed",
                err.to_string(),
                source: err
            )
        })?;

        info!(
            bulk = manifest.bulk.len(),
            delta = manifest.delta.len(),
            "bulk download manifest received"
        );

        Ok(manifest)
    }

    /// Downloads `entry` into the download directory and returns its path.
    ///
    /// Archives already present are not downloaded again. The archive is written to a temporary
    /// file first, so the final path only ever holds complete archives. A temporary file left by
    /// a failed download is removed when it is dropped.
    pub async fn download(&self, entry: &ManifestEntry) -> EtlResult<PathBuf> {
        let Some(file_name) = entry.local_file_name() else {
            bail!(
                ErrorKind::UpstreamUnavailable,
                "Manifest entry has no usable file name",
                entry.filename.clone()
            );
        };

        let dest = self.download_dir.join(file_name);
        if tokio::fs::try_exists(&dest).await.map_err(download_error)? {
            info!(path = %dest.display(), "archive already downloaded, skipping");
            return Ok(dest);
        }

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(download_error)?;

        let mut response = self
            .http
            .get(&entry.download_url)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                ErrorKind::UpstreamUnavailable,
                "Archive download failed",
                format!("{file_name}: status {status}")
            );
        }

        let temp_dir = self.download_dir.clone();
        let temp_file = tokio::task::spawn_blocking(move || NamedTempFile::new_in(temp_dir))
            .await?
            .map_err(download_error)?;
        let (file, temp_path) = temp_file.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            file.write_all(&chunk).await.map_err(download_error)?;
            written += chunk.len() as u64;
        }

        if let Some(expected) = entry.file_size {
            if expected != written {
                bail!(
                    ErrorKind::UpstreamUnavailable,
                    "Archive download was truncated",
                    format!("{file_name}: expected {expected} bytes, got {written}")
                );
            }
        }

        file.sync_all().await.map_err(download_error)?;
        drop(file);

        let persisted = dest.clone();
        tokio::task::spawn_blocking(move || temp_path.persist(persisted))
            .await?
            .map_err(|err| download_error(err.error))?;

        info!(path = %dest.display(), bytes = written, "archive downloaded");

        Ok(dest)
    }

    async fn request_manifest(&self) -> EtlResult<reqwest::Response> {
        let headers = self.auth_headers().await?;

        self.http
            .get(&self.manifest_url)
            .headers(headers)
            .send()
            .await
            .map_err(request_error)
    }

    async fn auth_headers(&self) -> EtlResult<HeaderMap> {
        let token = self.tokens.access_token().await?;
        let api_key = &self.tokens.credentials().api_key;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", token.expose_secret()))?,
        );
        headers.insert(API_KEY_HEADER, header_value(api_key.expose_secret())?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Ok(headers)
    }
}

fn header_value(value: &str) -> EtlResult<HeaderValue> {
    let mut header = HeaderValue::from_str(value).map_err(|err| {
        etl_error!(
            ErrorKind::AuthenticationError,
            "Credential cannot be sent in a header",
            err.to_string(),
            source: err
        )
    })?;
    header.set_sensitive(true);

    Ok(header)
}

#[track_caller]
fn request_error(err: reqwest::Error) -> EtlError {
    etl_error!(
        ErrorKind::UpstreamUnavailable,
        "MOT history API could not be reached",
        err.to_string(),
        source: err
    )
}

#[track_caller]
fn download_error(err: std::io::Error) -> EtlError {
    etl_error!(
        ErrorKind::UpstreamUnavailable,
        "Archive could not be stored",
        err.to_string(),
        source: err
    )
}
