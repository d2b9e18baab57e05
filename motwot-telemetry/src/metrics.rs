use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tempfile::NamedTempFile;
use tracing::debug;

// Global cache for the Prometheus handle used by [`init_metrics_handle`].
//
// A [`Mutex`] is used instead of [`OnceLock`] because the initialization is fallible and
// `OnceLock::get_or_try_init` is still unstable. [`PrometheusBuilder::install_recorder`] installs
// a global recorder and fails when called twice, which happens in tests.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the global Prometheus recorder and returns a handle for rendering.
///
/// Later calls return clones of the cached handle.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut prometheus_handle = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = &*prometheus_handle {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *prometheus_handle = Some(handle.clone());

    Ok(handle)
}

/// Renders every recorded metric into `path` in the Prometheus text format.
///
/// The file is replaced atomically, so a textfile collector never reads a partial file.
pub fn write_metrics_textfile(path: &Path, handle: &PrometheusHandle) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    handle.run_upkeep();
    let rendered = handle.render();

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(rendered.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;

    debug!(path = %path.display(), "metrics textfile written");

    Ok(())
}
