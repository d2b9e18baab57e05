use std::future::Future;
use std::path::PathBuf;

use crate::error::EtlResult;

/// Provider of upstream archives on local disk.
///
/// Implementations that fetch archives remotely download them before returning their paths.
/// Failures to reach the upstream service are reported with
/// [`crate::error::ErrorKind::UpstreamUnavailable`].
pub trait UpstreamSource {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Returns the newest delta archive, or [`None`] when upstream has not published one.
    fn latest_delta(&self) -> impl Future<Output = EtlResult<Option<PathBuf>>> + Send;

    /// Returns every archive of the current bulk snapshot.
    fn bulk_archives(&self) -> impl Future<Output = EtlResult<Vec<PathBuf>>> + Send;
}
