use serde::Deserialize;
use std::path::Path;

/// Listing of the archives currently published for bulk download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BulkDownloadManifest {
    /// Archives of the full snapshot.
    #[serde(default)]
    pub bulk: Vec<ManifestEntry>,
    /// Daily change archives, oldest first.
    #[serde(default)]
    pub delta: Vec<ManifestEntry>,
}

impl BulkDownloadManifest {
    /// Returns the newest delta archive, which upstream lists last.
    pub fn latest_delta(&self) -> Option<&ManifestEntry> {
        self.delta.last()
    }
}

/// One downloadable archive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub filename: String,
    pub download_url: String,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl ManifestEntry {
    /// Returns the file name the archive is stored under.
    ///
    /// Upstream names may carry a directory part, only the last component is kept. [`None`] is
    /// returned when nothing usable remains.
    pub fn local_file_name(&self) -> Option<&str> {
        let name = Path::new(&self.filename).file_name()?.to_str()?;
        if name == "." || name == ".." {
            return None;
        }

        Some(name)
    }
}
