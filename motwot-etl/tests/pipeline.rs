use motwot_etl::error::ErrorKind;
use motwot_etl::lock::RunLock;
use motwot_etl::pipeline::{Pipeline, PipelineConfig};
use motwot_etl::source::local::LocalArchiveSource;
use motwot_etl::table::memory::MemoryTable;
use motwot_etl::types::{Modification, NEVER_MOT};
use motwot_telemetry::tracing::init_test_tracing;
use serde_json::json;

mod support;

use support::{
    FaultInjectingTable, UnreachableSource, entries, key, ndjson, run_date, vehicle,
    write_archive, write_delta,
};

#[tokio::test(flavor = "multi_thread")]
async fn delta_run_merges_latest_archive_and_removes_staged_batch() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    write_delta(
        upstream.path(),
        "delta-light-vehicle_28-02-2024.zip",
        &[vehicle("ZZ99ZZZ", "CREATED", Some("SEAT"))],
    );
    let latest = write_delta(
        upstream.path(),
        "delta-light-vehicle_01-03-2024.zip",
        &[vehicle("ab12 cde", "CREATED", Some("FORD"))],
    );

    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        table.clone(),
    );

    let report = pipeline.run_delta(run_date()).await.unwrap();

    assert_eq!(report.archive.as_deref(), Some(latest.as_path()));
    assert_eq!(report.staged_records, 1);
    assert_eq!(report.merge.unwrap().inserted, 1);

    let rows = table.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key().as_str(), "AB12CDE");
    assert_eq!(rows[0].enriched.last_test_result.as_deref(), Some(NEVER_MOT));
    assert_eq!(
        rows[0].source_date,
        chrono::NaiveDate::from_ymd_opt(2024, 2, 29)
    );

    assert!(entries(staging.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn delta_run_without_upstream_delta_merges_nothing() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        table.clone(),
    );

    let report = pipeline.run_delta(run_date()).await.unwrap();

    assert!(report.archive.is_none());
    assert!(report.merge.is_none());
    assert!(table.is_empty().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn rerunning_the_same_delta_is_idempotent() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    write_delta(
        upstream.path(),
        "delta-light-vehicle_01-03-2024.zip",
        &[
            vehicle("A1", "CREATED", Some("FORD")),
            vehicle("B2", "UPDATED", Some("KIA")),
            vehicle("C3", "DELETED", None),
        ],
    );

    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        table.clone(),
    );

    pipeline.run_delta(run_date()).await.unwrap();
    let after_first = table.rows().await;

    let second = pipeline.run_delta(run_date()).await.unwrap();
    let after_second = table.rows().await;

    assert_eq!(after_first, after_second);
    let merge = second.merge.unwrap();
    assert_eq!(merge.updated, 2);
    assert_eq!(merge.inserted, 0);
    assert_eq!(merge.skipped_deletes, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn update_overwrites_every_column_of_the_row() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        table.clone(),
    );

    let created = write_delta(
        upstream.path(),
        "delta-light-vehicle_01-03-2024.zip",
        &[json!({
            "registration": "AB12CDE",
            "modification": "CREATED",
            "make": "FORD",
            "model": "FIESTA",
            "motTests": [
                { "completedDate": "2020-01-01T10:00:00Z", "testResult": "PASSED", "odometerValue": "1000" }
            ]
        })],
    );
    pipeline.merge_archive(&created, run_date()).await.unwrap();

    let updated = write_delta(
        upstream.path(),
        "delta-light-vehicle_02-03-2024.zip",
        &[json!({
            "registration": "AB12CDE",
            "modification": "UPDATED",
            "make": "VAUXHALL"
        })],
    );
    pipeline.merge_archive(&updated, run_date()).await.unwrap();

    let row = table.get(&key("AB12CDE")).await.unwrap();
    assert_eq!(row.modification, Modification::Updated);
    assert_eq!(row.vehicle.make.as_deref(), Some("VAUXHALL"));
    assert_eq!(row.vehicle.model, None);
    assert!(row.vehicle.mot_tests.is_empty());
    assert_eq!(row.enriched.last_test_result.as_deref(), Some(NEVER_MOT));
    assert_eq!(row.enriched.mileage, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn deleted_record_removes_existing_row() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        table.clone(),
    );

    let created = write_delta(
        upstream.path(),
        "delta-light-vehicle_01-03-2024.zip",
        &[vehicle("AB12CDE", "CREATED", Some("FORD"))],
    );
    pipeline.merge_archive(&created, run_date()).await.unwrap();

    let deleted = write_delta(
        upstream.path(),
        "delta-light-vehicle_02-03-2024.zip",
        &[vehicle("AB12CDE", "DELETED", None)],
    );
    let report = pipeline.merge_archive(&deleted, run_date()).await.unwrap();

    assert_eq!(report.merge.unwrap().deleted, 1);
    assert!(table.is_empty().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_merge_rolls_back_and_retains_staged_batch() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    let seeded = MemoryTable::new();
    let seed = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        seeded.clone(),
    );
    let initial = write_delta(
        upstream.path(),
        "delta-light-vehicle_28-02-2024.zip",
        &[
            vehicle("A1", "CREATED", Some("FORD")),
            vehicle("B2", "CREATED", Some("KIA")),
        ],
    );
    seed.merge_archive(&initial, run_date()).await.unwrap();
    let before = seeded.rows().await;

    let table = FaultInjectingTable::wrap(seeded.clone(), 2);
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        table.clone(),
    );
    write_delta(
        upstream.path(),
        "delta-light-vehicle_01-03-2024.zip",
        &[
            vehicle("A1", "DELETED", None),
            vehicle("B2", "UPDATED", Some("SEAT")),
            vehicle("C3", "CREATED", Some("SKODA")),
        ],
    );

    let err = pipeline.run_delta(run_date()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MergeFailed);
    assert_eq!(table.rollbacks(), 1);
    assert_eq!(seeded.rows().await, before);
    assert_eq!(entries(staging.path()), ["delta_2024-03-01.ndjson"]);

    // The lock was released, so a later run can proceed.
    assert!(RunLock::holder(staging.path()).unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_archive_fails_before_staging() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    std::fs::write(
        upstream.path().join("delta-light-vehicle_01-03-2024.zip"),
        b"this is not a zip archive",
    )
    .unwrap();

    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        table.clone(),
    );

    let err = pipeline.run_delta(run_date()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DecodeError);
    assert!(entries(staging.path()).is_empty());
    assert!(table.is_empty().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn record_without_registration_aborts_the_run() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    write_delta(
        upstream.path(),
        "delta-light-vehicle_01-03-2024.zip",
        &[
            vehicle("A1", "CREATED", Some("FORD")),
            json!({ "make": "KIA", "modification": "CREATED" }),
        ],
    );

    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        table.clone(),
    );

    let err = pipeline.run_delta(run_date()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NormalizationError);
    assert!(entries(staging.path()).is_empty());
    assert!(table.is_empty().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_upstream_fails_without_merging() {
    init_test_tracing();
    let staging = tempfile::tempdir().unwrap();

    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        UnreachableSource,
        table.clone(),
    );

    let delta_err = pipeline.run_delta(run_date()).await.unwrap_err();
    let bootstrap_err = pipeline.bootstrap(run_date()).await.unwrap_err();

    assert_eq!(delta_err.kind(), ErrorKind::UpstreamUnavailable);
    assert_eq!(bootstrap_err.kind(), ErrorKind::UpstreamUnavailable);
    assert!(table.is_empty().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_run_is_rejected() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    write_delta(
        upstream.path(),
        "delta-light-vehicle_01-03-2024.zip",
        &[vehicle("A1", "CREATED", Some("FORD"))],
    );

    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        table.clone(),
    );

    let held = RunLock::acquire(staging.path(), "delta").unwrap();
    let err = pipeline.run_delta(run_date()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConcurrentRun);
    assert!(table.is_empty().await);

    held.release().unwrap();
    pipeline.run_delta(run_date()).await.unwrap();
    assert_eq!(table.len().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn staged_batch_is_kept_when_configured() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    write_delta(
        upstream.path(),
        "delta-light-vehicle_01-03-2024.zip",
        &[vehicle("A1", "CREATED", Some("FORD"))],
    );

    let mut config = PipelineConfig::new(staging.path());
    config.keep_staged_batches = true;
    let pipeline = Pipeline::new(
        config,
        LocalArchiveSource::new(upstream.path()),
        MemoryTable::new(),
    );

    pipeline.run_delta(run_date()).await.unwrap();

    assert_eq!(entries(staging.path()), ["delta_2024-03-01.ndjson"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_loads_every_bulk_archive_and_replaces_table() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    write_archive(
        upstream.path(),
        "bulk-light-vehicle_01-03-2024_1.zip",
        &[
            (
                "bulk-part-1.json.gz",
                ndjson(&[
                    vehicle("A1", "CREATED", Some("FORD")),
                    vehicle("B2", "CREATED", Some("KIA")),
                ]),
            ),
            (
                "bulk-part-2.json.gz",
                ndjson(&[vehicle("C3", "DELETED", None)]),
            ),
        ],
    );
    write_archive(
        upstream.path(),
        "bulk-light-vehicle_01-03-2024_2.zip",
        &[(
            "bulk-part-1.json.gz",
            ndjson(&[vehicle("A1", "UPDATED", Some("SEAT"))]),
        )],
    );

    let table = MemoryTable::new();
    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        table.clone(),
    );

    let report = pipeline.bootstrap(run_date()).await.unwrap();

    assert_eq!(report.archives, 2);
    assert_eq!(report.staged_records, 4);
    assert_eq!(report.skipped_deletes, 1);
    assert_eq!(report.collapsed_duplicates, 1);
    assert_eq!(report.loaded_rows, 2);

    let a1 = table.get(&key("A1")).await.unwrap();
    assert_eq!(a1.vehicle.make.as_deref(), Some("SEAT"));
    assert!(table.get(&key("C3")).await.is_none());
    assert!(entries(staging.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_without_bulk_archives_fails() {
    init_test_tracing();
    let upstream = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    let pipeline = Pipeline::new(
        PipelineConfig::new(staging.path()),
        LocalArchiveSource::new(upstream.path()),
        MemoryTable::new(),
    );

    let err = pipeline.bootstrap(run_date()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
}
