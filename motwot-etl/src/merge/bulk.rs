use metrics::histogram;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{ErrorKind, EtlResult};
use crate::metrics::{MOTWOT_MERGE_DURATION_SECONDS, TABLE_LABEL};
use crate::staging::StagedBatch;
use crate::table::{AuthoritativeTable, BulkLoad};
use crate::types::{ChangeRecord, Modification};

const BULK_LOAD_FAILED: &str = "Bulk load failed";

/// Records handed to the table per [`BulkLoad::append`].
pub const BULK_LOAD_CHUNK_RECORDS: usize = 10_000;

/// Chunks read ahead of the table.
const READ_AHEAD_CHUNKS: usize = 2;

/// Row counts of one bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkLoadResult {
    /// Records read from the staged batch.
    pub staged_records: u64,
    /// Rows the table holds after the load.
    pub loaded_rows: u64,
    /// Deleted records of the batch, which are not loaded.
    pub skipped_deletes: u64,
    /// Records replaced by a later record with the same key.
    pub collapsed_duplicates: u64,
}

#[derive(Debug, Default)]
struct ReadCounts {
    staged: u64,
    live: u64,
    deleted: u64,
}

/// Replaces the content of `table` with the records of a bulk batch.
///
/// The batch is streamed from disk in chunks of [`BULK_LOAD_CHUNK_RECORDS`], so the snapshot is
/// never held in memory as a whole. Deleted records are skipped and of several records with the
/// same key the last one is kept. On failure the table keeps its previous content and the error
/// has kind [`ErrorKind::MergeFailed`].
pub async fn load_bulk<T>(table: &T, batch: &StagedBatch) -> EtlResult<BulkLoadResult>
where
    T: AuthoritativeTable + Sync,
{
    let started = Instant::now();

    let mut load = table
        .begin_replace()
        .await
        .map_err(|err| err.into_stage(ErrorKind::MergeFailed, BULK_LOAD_FAILED))?;

    let (sender, mut receiver) = mpsc::channel(READ_AHEAD_CHUNKS);
    let reader_batch = batch.clone();
    let reader = tokio::task::spawn_blocking(move || read_live_chunks(&reader_batch, &sender));

    let mut appended = Ok(());
    while let Some(chunk) = receiver.recv().await {
        let result = match chunk {
            Ok(records) => load.append(records).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            appended = Err(err);
            break;
        }
    }
    // Unblocks the reader when the load stopped early.
    drop(receiver);

    let counts = reader.await?;
    if let Err(err) = appended {
        error!(error_kind = ?err.kind(), "bulk load failed, aborting");
        if let Err(abort_err) = load.abort().await {
            error!(error = %abort_err, "failed to abort bulk load");
        }

        return Err(err.into_stage(ErrorKind::MergeFailed, BULK_LOAD_FAILED));
    }

    let loaded_rows = load
        .finish()
        .await
        .map_err(|err| err.into_stage(ErrorKind::MergeFailed, BULK_LOAD_FAILED))?;

    histogram!(MOTWOT_MERGE_DURATION_SECONDS, TABLE_LABEL => T::name())
        .record(started.elapsed().as_secs_f64());

    let result = BulkLoadResult {
        staged_records: counts.staged,
        loaded_rows,
        skipped_deletes: counts.deleted,
        collapsed_duplicates: counts.live.saturating_sub(loaded_rows),
    };
    info!(
        staged = result.staged_records,
        loaded = result.loaded_rows,
        skipped_deletes = result.skipped_deletes,
        collapsed = result.collapsed_duplicates,
        "bulk load finished"
    );

    Ok(result)
}

/// Sends the non-deleted records of `batch` in chunks, stopping at the first error or when the
/// receiving side is gone.
fn read_live_chunks(
    batch: &StagedBatch,
    sender: &mpsc::Sender<EtlResult<Vec<ChangeRecord>>>,
) -> ReadCounts {
    let mut counts = ReadCounts::default();

    let records = match batch.records() {
        Ok(records) => records,
        Err(err) => {
            let _ = sender.blocking_send(Err(err));
            return counts;
        }
    };

    let mut chunk = Vec::with_capacity(BULK_LOAD_CHUNK_RECORDS);
    for record in records {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                let _ = sender.blocking_send(Err(err));
                return counts;
            }
        };

        counts.staged += 1;
        if record.modification == Modification::Deleted {
            counts.deleted += 1;
            continue;
        }

        counts.live += 1;
        chunk.push(record);
        if chunk.len() == BULK_LOAD_CHUNK_RECORDS {
            let full = std::mem::replace(&mut chunk, Vec::with_capacity(BULK_LOAD_CHUNK_RECORDS));
            if sender.blocking_send(Ok(full)).is_err() {
                return counts;
            }
        }
    }

    if !chunk.is_empty() {
        let _ = sender.blocking_send(Ok(chunk));
    }

    debug!(path = %batch.path().display(), records = counts.staged, "bulk batch read");

    counts
}
