use metrics::{Unit, describe_counter, describe_histogram};
use std::sync::Once;

static REGISTER: Once = Once::new();

/// Duration of the statements applying a committed merge.
pub const BQ_MERGE_DURATION_SECONDS: &str = "motwot_bq_merge_duration_seconds";

/// Statements sent to load staging tables.
pub const BQ_STAGING_STATEMENTS_TOTAL: &str = "motwot_bq_staging_statements_total";

/// Register BigQuery-specific metrics. Safe to call multiple times.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        describe_histogram!(
            BQ_MERGE_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds to load the staging table and merge it into the authoritative table"
        );
        describe_counter!(
            BQ_STAGING_STATEMENTS_TOTAL,
            Unit::Count,
            "Number of insert statements sent to load staging tables"
        );
    });
}
