use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::decoder::source_date_from_archive_name;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::source::UpstreamSource;

const DELTA_PREFIX: &str = "delta";
const BULK_PREFIX: &str = "bulk";

/// Serves archives that already sit in a directory.
///
/// Delta archives are the `*.zip` files whose name starts with `delta`, bulk archives those
/// starting with `bulk`. Archives are ordered by the date in their name, then by name, so the
/// newest delta is the last one.
#[derive(Debug, Clone)]
pub struct LocalArchiveSource {
    dir: PathBuf,
}

impl LocalArchiveSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn archives(&self, prefix: &str) -> EtlResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir).map_err(|err| {
            etl_error!(
                ErrorKind::UpstreamUnavailable,
                "Archive directory could not be read",
                format!("{}: {err}", self.dir.display()),
                source: err
            )
        })?;

        let mut archives: Vec<(Option<NaiveDate>, PathBuf)> = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !name.starts_with(prefix) || !name.ends_with(".zip") || !path.is_file() {
                continue;
            }

            archives.push((source_date_from_archive_name(&path), path));
        }
        archives.sort();

        debug!(
            dir = %self.dir.display(),
            prefix,
            archives = archives.len(),
            "listed local archives"
        );

        Ok(archives.into_iter().map(|(_, path)| path).collect())
    }
}

impl UpstreamSource for LocalArchiveSource {
    fn name() -> &'static str {
        "local"
    }

    async fn latest_delta(&self) -> EtlResult<Option<PathBuf>> {
        Ok(self.archives(DELTA_PREFIX)?.pop())
    }

    async fn bulk_archives(&self) -> EtlResult<Vec<PathBuf>> {
        self.archives(BULK_PREFIX)
    }
}
