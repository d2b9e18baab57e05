use chrono::NaiveDate;
use motwot_config::shared::{
    RunnerConfig, RunnerConfigWithoutSecrets, UpstreamConfig, WarehouseConfig,
};
use motwot_destinations::bigquery::BigQueryTable;
use motwot_etl::pipeline::{Pipeline, PipelineConfig};
use motwot_etl::source::UpstreamSource;
use motwot_etl::source::local::LocalArchiveSource;
use motwot_etl::table::AuthoritativeTable;
use motwot_etl::table::memory::MemoryTable;
use motwot_sources::mot_history::{MotHistoryClient, MotHistoryCredentials, MotHistorySource};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::RunnerResult;

/// What a run does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Merge the latest delta, or the given archive, into the table.
    Delta { archive: Option<PathBuf> },
    /// Replace the table content with the bulk snapshot.
    Bootstrap,
}

/// Runs `job` for `run_date` against the configured upstream and warehouse.
///
/// Sources and tables are dispatched statically, which is more verbose than trait objects but
/// keeps the pipeline monomorphic.
pub async fn run_with_config(
    config: RunnerConfig,
    job: Job,
    run_date: NaiveDate,
) -> RunnerResult<()> {
    info!(?job, %run_date, "starting motwot runner");

    debug!(
        config = ?RunnerConfigWithoutSecrets::from(config.clone()),
        "using runner config"
    );

    let pipeline_config = PipelineConfig {
        staging_dir: config.staging.dir.clone(),
        keep_staged_batches: config.staging.keep_after_merge,
        write_buffer_bytes: config.staging.write_buffer_bytes,
    };

    match &config.warehouse {
        WarehouseConfig::Memory => {
            warn!("using the memory warehouse, merged rows are dropped when the run ends");

            let table = MemoryTable::new();
            run_with_table(&config.upstream, pipeline_config, table, job, run_date).await
        }
        WarehouseConfig::BigQuery {
            project_id,
            dataset_id,
            table_id,
            service_account_key,
        } => {
            let table = BigQueryTable::new_with_key(
                project_id.clone(),
                dataset_id.clone(),
                table_id.clone(),
                service_account_key.expose_secret(),
            )
            .await?;

            run_with_table(&config.upstream, pipeline_config, table, job, run_date).await
        }
    }
}

async fn run_with_table<T>(
    upstream: &UpstreamConfig,
    pipeline_config: PipelineConfig,
    table: T,
    job: Job,
    run_date: NaiveDate,
) -> RunnerResult<()>
where
    T: AuthoritativeTable + Sync,
{
    match upstream {
        UpstreamConfig::MotHistory {
            client_id,
            client_secret,
            token_url,
            scope,
            api_key,
            manifest_url,
            download_dir,
        } => {
            let credentials = MotHistoryCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                token_url: token_url.clone(),
                scope: scope.clone(),
                api_key: api_key.clone(),
            };
            let client =
                MotHistoryClient::new(credentials, manifest_url.clone(), download_dir.clone())?;
            let source = MotHistorySource::new(client);

            run_job(Pipeline::new(pipeline_config, source, table), job, run_date).await
        }
        UpstreamConfig::Local { dir } => {
            let source = LocalArchiveSource::new(dir.clone());

            run_job(Pipeline::new(pipeline_config, source, table), job, run_date).await
        }
    }
}

async fn run_job<S, T>(pipeline: Pipeline<S, T>, job: Job, run_date: NaiveDate) -> RunnerResult<()>
where
    S: UpstreamSource + Sync,
    T: AuthoritativeTable + Sync,
{
    match job {
        Job::Delta { archive: None } => {
            let report = pipeline.run_delta(run_date).await?;
            match &report.merge {
                Some(merge) => info!(
                    archive = ?report.archive,
                    staged_records = report.staged_records,
                    inserted = merge.inserted,
                    updated = merge.updated,
                    deleted = merge.deleted,
                    skipped_deletes = merge.skipped_deletes,
                    "delta job finished"
                ),
                None => info!("delta job finished, no delta was available"),
            }
        }
        Job::Delta {
            archive: Some(archive),
        } => {
            let report = pipeline.merge_archive(&archive, run_date).await?;
            info!(
                archive = %archive.display(),
                staged_records = report.staged_records,
                rows_changed = report.merge.map(|merge| merge.rows_changed()),
                "archive merge finished"
            );
        }
        Job::Bootstrap => {
            let report = pipeline.bootstrap(run_date).await?;
            info!(
                archives = report.archives,
                staged_records = report.staged_records,
                loaded_rows = report.loaded_rows,
                skipped_deletes = report.skipped_deletes,
                "bootstrap job finished"
            );
        }
    }

    Ok(())
}
