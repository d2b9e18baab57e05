use fail::FailScenario;
use motwot_etl::error::ErrorKind;
use motwot_etl::failpoints::{
    MERGE_ENGINE__BEFORE_COMMIT, MERGE_ENGINE__BEFORE_OPERATION, PIPELINE__AFTER_STAGING,
};
use motwot_etl::lock::RunLock;
use motwot_etl::pipeline::{Pipeline, PipelineConfig};
use motwot_etl::source::local::LocalArchiveSource;
use motwot_etl::table::memory::MemoryTable;
use motwot_telemetry::tracing::init_test_tracing;

#[path = "../support/mod.rs"]
mod support;

use support::{entries, key, run_date, vehicle, write_delta};

/// Configures failpoints for the lifetime of the scenario and turns them off on drop.
struct CustomFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> CustomFailScenario<'a> {
    fn setup(failpoints: &[(&str, &str)]) -> CustomFailScenario<'a> {
        let scenario = FailScenario::setup();
        for (failpoint, action) in failpoints {
            fail::cfg(*failpoint, action).unwrap();
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }
}

impl Drop for CustomFailScenario<'_> {
    fn drop(&mut self) {
        for failpoint in &self.failpoints {
            fail::remove(failpoint);
        }
    }
}

/// Builds a pipeline over a table holding A1 (FORD) and B2 (KIA) and stages a delta touching
/// both plus a new key.
async fn seeded_pipeline(
    upstream: &std::path::Path,
    staging: &std::path::Path,
) -> (Pipeline<LocalArchiveSource, MemoryTable>, MemoryTable) {
    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging),
        LocalArchiveSource::new(upstream),
        table.clone(),
    );

    let initial = write_delta(
        upstream,
        "delta-light-vehicle_28-02-2024.zip",
        &[
            vehicle("A1", "CREATED", Some("FORD")),
            vehicle("B2", "CREATED", Some("KIA")),
        ],
    );
    pipeline.merge_archive(&initial, run_date()).await.unwrap();

    write_delta(
        upstream,
        "delta-light-vehicle_01-03-2024.zip",
        &[
            vehicle("A1", "DELETED", None),
            vehicle("B2", "UPDATED", Some("SEAT")),
            vehicle("C3", "CREATED", Some("SKODA")),
        ],
    );

    (pipeline, table)
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_mid_merge_leaves_table_untouched() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let (pipeline, table) = seeded_pipeline(upstream.path(), staging.path()).await;
    let before = table.rows().await;

    let scenario =
        CustomFailScenario::setup(&[(MERGE_ENGINE__BEFORE_OPERATION, "2*off->return")]);
    let err = pipeline.run_delta(run_date()).await.unwrap_err();
    drop(scenario);

    assert_eq!(err.kind(), ErrorKind::MergeFailed);
    assert_eq!(table.rows().await, before);
    assert_eq!(entries(staging.path()), ["delta_2024-03-01.ndjson"]);

    // Rerunning once the fault is gone applies the whole batch.
    let report = pipeline.run_delta(run_date()).await.unwrap();
    let merge = report.merge.unwrap();
    assert_eq!((merge.inserted, merge.updated, merge.deleted), (1, 1, 1));
    assert!(table.get(&key("A1")).await.is_none());
    assert_eq!(
        table.get(&key("B2")).await.unwrap().vehicle.make.as_deref(),
        Some("SEAT")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_before_commit_leaves_table_untouched() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let (pipeline, table) = seeded_pipeline(upstream.path(), staging.path()).await;
    let before = table.rows().await;

    let scenario = CustomFailScenario::setup(&[(MERGE_ENGINE__BEFORE_COMMIT, "return(merge)")]);
    let err = pipeline.run_delta(run_date()).await.unwrap_err();
    drop(scenario);

    assert_eq!(err.kind(), ErrorKind::MergeFailed);
    assert_eq!(table.rows().await, before);
    assert!(RunLock::holder(staging.path()).unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_after_staging_retains_batch_and_skips_merge() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let (pipeline, table) = seeded_pipeline(upstream.path(), staging.path()).await;
    let before = table.rows().await;

    let scenario = CustomFailScenario::setup(&[(PIPELINE__AFTER_STAGING, "return")]);
    let err = pipeline.run_delta(run_date()).await.unwrap_err();
    drop(scenario);

    assert_eq!(err.kind(), ErrorKind::FailpointTriggered);
    assert_eq!(table.rows().await, before);
    assert_eq!(entries(staging.path()), ["delta_2024-03-01.ndjson"]);
}
