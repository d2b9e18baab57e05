//! Metric names and labels recorded by pipeline runs.
//!
//! Recording goes through the `metrics` facade, so nothing is exported unless the embedding
//! binary installs a recorder.

/// Label for the merge operation applied to a row.
pub const OPERATION_LABEL: &str = "operation";

/// Label for the job that produced a run (`delta` or `bootstrap`).
pub const JOB_LABEL: &str = "job";

/// Label for the outcome of a run (`succeeded` or `failed`).
pub const OUTCOME_LABEL: &str = "outcome";

/// Label for the kind of the error that failed a run.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Counter for records read out of upstream archives.
pub const MOTWOT_RECORDS_DECODED_TOTAL: &str = "motwot_records_decoded_total";

/// Counter for records written to staged batches.
pub const MOTWOT_RECORDS_STAGED_TOTAL: &str = "motwot_records_staged_total";

/// Counter for rows touched by merges, labeled by [`OPERATION_LABEL`].
pub const MOTWOT_MERGE_ROWS_TOTAL: &str = "motwot_merge_rows_total";

/// Histogram of merge durations in seconds.
pub const MOTWOT_MERGE_DURATION_SECONDS: &str = "motwot_merge_duration_seconds";

/// Counter for finished runs, labeled by [`JOB_LABEL`] and [`OUTCOME_LABEL`].
pub const MOTWOT_RUNS_TOTAL: &str = "motwot_runs_total";

/// Label for the authoritative table implementation.
pub const TABLE_LABEL: &str = "table";
