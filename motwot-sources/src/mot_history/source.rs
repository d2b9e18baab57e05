use motwot_etl::error::EtlResult;
use motwot_etl::source::UpstreamSource;
use std::path::PathBuf;
use tracing::info;

use crate::mot_history::client::MotHistoryClient;

/// Serves archives downloaded from the MOT history trade API.
#[derive(Debug)]
pub struct MotHistorySource {
    client: MotHistoryClient,
}

impl MotHistorySource {
    pub fn new(client: MotHistoryClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &MotHistoryClient {
        &self.client
    }
}

impl UpstreamSource for MotHistorySource {
    fn name() -> &'static str {
        "mot_history"
    }

    async fn latest_delta(&self) -> EtlResult<Option<PathBuf>> {
        let manifest = self.client.manifest().await?;

        let Some(entry) = manifest.latest_delta() else {
            info!("no delta archive published");
            return Ok(None);
        };

        Ok(Some(self.client.download(entry).await?))
    }

    async fn bulk_archives(&self) -> EtlResult<Vec<PathBuf>> {
        let manifest = self.client.manifest().await?;

        let mut archives = Vec::with_capacity(manifest.bulk.len());
        for entry in &manifest.bulk {
            archives.push(self.client.download(entry).await?);
        }

        info!(archives = archives.len(), "bulk archives available");

        Ok(archives)
    }
}
