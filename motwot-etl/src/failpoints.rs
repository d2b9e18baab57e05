//! Named fault injection points used by the failure tests.
//!
//! Points are inert unless the `failpoints` feature is enabled and a test configures them
//! through the `fail` crate.

use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Evaluated by the merge engine before each row operation inside a merge transaction.
pub const MERGE_ENGINE__BEFORE_OPERATION: &str = "merge_engine.before_operation";

/// Evaluated by the merge engine right before the transaction is committed.
pub const MERGE_ENGINE__BEFORE_COMMIT: &str = "merge_engine.before_commit";

/// Evaluated by the pipeline driver after a batch was staged and before it is merged.
pub const PIPELINE__AFTER_STAGING: &str = "pipeline.after_staging";

/// Returns an error when the named failpoint is configured with `return`.
///
/// The optional parameter selects the kind of the returned error: `merge`, `upstream`,
/// `staging` or `decode`. Any other value yields a generic failpoint error.
pub fn etl_fail_point(name: &str) -> EtlResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("merge") => ErrorKind::MergeFailed,
            Some("upstream") => ErrorKind::UpstreamUnavailable,
            Some("staging") => ErrorKind::StagingFailed,
            Some("decode") => ErrorKind::DecodeError,
            _ => ErrorKind::FailpointTriggered,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
