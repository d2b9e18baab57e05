//! Sequencing of the stages of a run.
//!
//! A run decodes upstream archives, normalizes their records, stages them and merges the staged
//! batch into the authoritative table. The first failing stage aborts the run with the error
//! kind of that stage and the table is left as it was. Runs hold a [`RunLock`] from start to
//! end, so two runs never merge into the same table at once.

use chrono::NaiveDate;
use metrics::counter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bail;
use crate::decoder::{ArchiveDecoder, source_date_from_archive_name};
use crate::error::{ErrorKind, EtlResult};
use crate::failpoints::{PIPELINE__AFTER_STAGING, etl_fail_point};
use crate::lock::RunLock;
use crate::merge::{MergeResult, load_bulk, merge};
use crate::metrics::{
    ERROR_KIND_LABEL, JOB_LABEL, MOTWOT_RECORDS_DECODED_TOTAL, MOTWOT_RECORDS_STAGED_TOTAL,
    MOTWOT_RUNS_TOTAL, OUTCOME_LABEL,
};
use crate::normalize::RecordNormalizer;
use crate::source::UpstreamSource;
use crate::staging::{BatchKind, StagedBatch, StagingWriter};
use crate::table::AuthoritativeTable;

const DELTA_JOB: &str = "delta";
const BOOTSTRAP_JOB: &str = "bootstrap";

/// Settings shared by every run of a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding staged batches and the run lock.
    pub staging_dir: PathBuf,
    /// Keeps staged batches after a successful run instead of removing them.
    pub keep_staged_batches: bool,
    /// Size of the write buffer used while staging.
    pub write_buffer_bytes: usize,
}

impl PipelineConfig {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            keep_staged_batches: false,
            write_buffer_bytes: StagingWriter::DEFAULT_BUFFER_BYTES,
        }
    }
}

/// Outcome of a delta run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_date: NaiveDate,
    /// Archive the run merged, [`None`] when upstream had no delta to offer.
    pub archive: Option<PathBuf>,
    pub staged_records: u64,
    pub merge: Option<MergeResult>,
}

/// Outcome of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub run_date: NaiveDate,
    pub archives: usize,
    pub staged_records: u64,
    /// Rows the table holds after the load.
    pub loaded_rows: u64,
    /// Deleted records present in the snapshot, which are not loaded.
    pub skipped_deletes: u64,
    pub collapsed_duplicates: u64,
}

/// Drives runs from an upstream source into an authoritative table.
#[derive(Debug)]
pub struct Pipeline<S, T> {
    config: Arc<PipelineConfig>,
    source: S,
    table: T,
}

impl<S, T> Pipeline<S, T>
where
    S: UpstreamSource + Sync,
    T: AuthoritativeTable + Sync,
{
    pub fn new(config: PipelineConfig, source: S, table: T) -> Self {
        Self {
            config: Arc::new(config),
            source,
            table,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    /// Merges the newest upstream delta into the table.
    ///
    /// Ends successfully without merging anything when upstream has no delta.
    pub async fn run_delta(&self, run_date: NaiveDate) -> EtlResult<RunReport> {
        let result = self.run_delta_locked(None, run_date).await;
        record_run(DELTA_JOB, &result);

        result
    }

    /// Merges a specific delta archive into the table, bypassing the upstream source.
    pub async fn merge_archive(&self, archive: &Path, run_date: NaiveDate) -> EtlResult<RunReport> {
        let result = self.run_delta_locked(Some(archive), run_date).await;
        record_run(DELTA_JOB, &result);

        result
    }

    /// Replaces the content of the table with the current upstream bulk snapshot.
    ///
    /// The staged snapshot is streamed into the table in chunks. Deleted records of the snapshot
    /// are not loaded.
    pub async fn bootstrap(&self, run_date: NaiveDate) -> EtlResult<BootstrapReport> {
        let result = self.bootstrap_locked(run_date).await;
        record_run(BOOTSTRAP_JOB, &result);

        result
    }

    async fn run_delta_locked(
        &self,
        archive: Option<&Path>,
        run_date: NaiveDate,
    ) -> EtlResult<RunReport> {
        let _lock = RunLock::acquire(&self.config.staging_dir, DELTA_JOB)?;

        info!(%run_date, source = S::name(), table = T::name(), "starting delta run");

        let archive = match archive {
            Some(archive) => archive.to_path_buf(),
            None => {
                let latest = self.source.latest_delta().await.map_err(|err| {
                    err.into_stage(
                        ErrorKind::UpstreamUnavailable,
                        "Latest delta archive could not be obtained",
                    )
                })?;

                let Some(latest) = latest else {
                    info!(%run_date, "upstream has no delta archive, nothing to merge");
                    return Ok(RunReport {
                        run_date,
                        archive: None,
                        staged_records: 0,
                        merge: None,
                    });
                };

                latest
            }
        };

        let batch = self
            .stage(vec![archive.clone()], BatchKind::Delta, run_date)
            .await?;

        // From here on the staged batch stays on disk when the run fails, so that it can be
        // inspected or merged again.
        etl_fail_point(PIPELINE__AFTER_STAGING)?;

        let merge_result = merge(&self.table, &batch).await.inspect_err(|err| {
            error!(
                path = %batch.path().display(),
                error_kind = ?err.kind(),
                "merge failed, staged batch retained"
            );
        })?;

        let staged_records = batch.record_count();
        self.finish_batch(batch);

        info!(
            %run_date,
            archive = %archive.display(),
            staged_records,
            inserted = merge_result.inserted,
            updated = merge_result.updated,
            deleted = merge_result.deleted,
            "delta run completed"
        );

        Ok(RunReport {
            run_date,
            archive: Some(archive),
            staged_records,
            merge: Some(merge_result),
        })
    }

    async fn bootstrap_locked(&self, run_date: NaiveDate) -> EtlResult<BootstrapReport> {
        let _lock = RunLock::acquire(&self.config.staging_dir, BOOTSTRAP_JOB)?;

        info!(%run_date, source = S::name(), table = T::name(), "starting bootstrap run");

        let archives = self.source.bulk_archives().await.map_err(|err| {
            err.into_stage(
                ErrorKind::UpstreamUnavailable,
                "Bulk archives could not be obtained",
            )
        })?;
        if archives.is_empty() {
            bail!(
                ErrorKind::UpstreamUnavailable,
                "Upstream has no bulk archives"
            );
        }

        let archive_count = archives.len();
        let batch = self.stage(archives, BatchKind::Bulk, run_date).await?;

        etl_fail_point(PIPELINE__AFTER_STAGING)?;

        let loaded = load_bulk(&self.table, &batch).await.inspect_err(|err| {
            error!(
                path = %batch.path().display(),
                error_kind = ?err.kind(),
                "bulk load failed, staged batch retained"
            );
        })?;

        self.finish_batch(batch);

        info!(
            %run_date,
            archives = archive_count,
            staged_records = loaded.staged_records,
            loaded_rows = loaded.loaded_rows,
            "bootstrap run completed"
        );

        Ok(BootstrapReport {
            run_date,
            archives: archive_count,
            staged_records: loaded.staged_records,
            loaded_rows: loaded.loaded_rows,
            skipped_deletes: loaded.skipped_deletes,
            collapsed_duplicates: loaded.collapsed_duplicates,
        })
    }

    /// Decodes, normalizes and stages `archives` as one batch.
    async fn stage(
        &self,
        archives: Vec<PathBuf>,
        kind: BatchKind,
        run_date: NaiveDate,
    ) -> EtlResult<StagedBatch> {
        let writer = StagingWriter::new(&self.config.staging_dir)
            .with_buffer_bytes(self.config.write_buffer_bytes);

        // Decoding and writing are blocking file operations, so we keep them off the runtime
        // workers.
        tokio::task::spawn_blocking(move || stage_archives(&writer, &archives, kind, run_date))
            .await?
    }

    fn finish_batch(&self, batch: StagedBatch) {
        if self.config.keep_staged_batches {
            info!(path = %batch.path().display(), "keeping staged batch");
            return;
        }

        // The table already reflects the batch, so a leftover artifact is only worth a warning.
        let path = batch.path().to_path_buf();
        if let Err(err) = batch.discard() {
            warn!(path = %path.display(), error = %err, "failed to remove staged batch");
        }
    }
}

fn stage_archives(
    writer: &StagingWriter,
    archives: &[PathBuf],
    kind: BatchKind,
    run_date: NaiveDate,
) -> EtlResult<StagedBatch> {
    let mut batch = writer.begin(kind, run_date)?;

    for archive in archives {
        let source_date = source_date_from_archive_name(archive);
        let normalizer = RecordNormalizer::new(run_date).with_source_date(source_date);

        let mut decoded: u64 = 0;
        for raw in ArchiveDecoder::open(archive)?.records() {
            let raw = raw?;
            decoded += 1;

            let record = normalizer.normalize(&raw)?;
            batch.append(&record)?;
        }

        counter!(MOTWOT_RECORDS_DECODED_TOTAL).increment(decoded);
        info!(archive = %archive.display(), records = decoded, "archive decoded");
    }

    counter!(MOTWOT_RECORDS_STAGED_TOTAL).increment(batch.record_count());

    batch.finish()
}

fn record_run<R>(job: &'static str, result: &EtlResult<R>) {
    match result {
        Ok(_) => {
            counter!(MOTWOT_RUNS_TOTAL, JOB_LABEL => job, OUTCOME_LABEL => "succeeded")
                .increment(1);
        }
        Err(err) => {
            counter!(
                MOTWOT_RUNS_TOTAL,
                JOB_LABEL => job,
                OUTCOME_LABEL => "failed",
                ERROR_KIND_LABEL => format!("{:?}", err.kind()),
            )
            .increment(1);
        }
    }
}
