use metrics::{counter, histogram};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::failpoints::{
    MERGE_ENGINE__BEFORE_COMMIT, MERGE_ENGINE__BEFORE_OPERATION, etl_fail_point,
};
use crate::merge::collapse_duplicates;
use crate::metrics::{
    MOTWOT_MERGE_DURATION_SECONDS, MOTWOT_MERGE_ROWS_TOTAL, OPERATION_LABEL, TABLE_LABEL,
};
use crate::staging::StagedBatch;
use crate::table::{AuthoritativeTable, MergeTransaction};
use crate::types::{ChangeRecord, RegistrationKey};

const MERGE_FAILED: &str = "Merge of staged batch failed";

/// Row counts of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// Rows added for keys the table did not hold.
    pub inserted: u64,
    /// Rows replaced wholesale.
    pub updated: u64,
    /// Rows removed.
    pub deleted: u64,
    /// Deletes of keys the table did not hold, which change nothing.
    pub skipped_deletes: u64,
    /// Records dropped because a later record in the batch had the same key.
    pub collapsed_duplicates: u64,
}

impl MergeResult {
    /// Returns the number of rows the merge changed.
    pub fn rows_changed(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

/// Merges the records of a staged batch into `table`.
///
/// On failure the table is left unchanged and the error has kind [`ErrorKind::MergeFailed`].
/// The staged artifact is never modified.
pub async fn merge<T>(table: &T, batch: &StagedBatch) -> EtlResult<MergeResult>
where
    T: AuthoritativeTable + Sync,
{
    let records = batch
        .read_all()
        .map_err(|err| err.into_stage(ErrorKind::MergeFailed, MERGE_FAILED))?;

    debug!(
        path = %batch.path().display(),
        records = records.len(),
        "read staged batch for merge"
    );

    merge_records(table, records).await
}

/// Merges `records` into `table` as a single transaction.
pub async fn merge_records<T>(table: &T, records: Vec<ChangeRecord>) -> EtlResult<MergeResult>
where
    T: AuthoritativeTable + Sync,
{
    let started = Instant::now();
    let (records, collapsed_duplicates) = collapse_duplicates(records);
    let mut result = MergeResult {
        collapsed_duplicates,
        ..MergeResult::default()
    };

    if collapsed_duplicates > 0 {
        info!(
            collapsed = collapsed_duplicates,
            "batch contained repeated keys, keeping the last record of each"
        );
    }

    if records.is_empty() {
        info!(table = T::name(), "nothing to merge");
        return Ok(result);
    }

    let mut transaction = table
        .begin_merge()
        .await
        .map_err(|err| err.into_stage(ErrorKind::MergeFailed, MERGE_FAILED))?;

    if let Err(err) = apply(&mut transaction, records, &mut result).await {
        let err = err.into_stage(ErrorKind::MergeFailed, MERGE_FAILED);
        error!(table = T::name(), error = %err, "merge failed, rolling back");

        if let Err(rollback_err) = transaction.rollback().await {
            error!(table = T::name(), error = %rollback_err, "rollback of failed merge failed");
            return Err(EtlError::from(vec![err, rollback_err]));
        }

        return Err(err);
    }

    transaction
        .commit()
        .await
        .map_err(|err| err.into_stage(ErrorKind::MergeFailed, MERGE_FAILED))?;

    record_metrics::<T>(&result, started);

    info!(
        table = T::name(),
        inserted = result.inserted,
        updated = result.updated,
        deleted = result.deleted,
        skipped_deletes = result.skipped_deletes,
        duration_ms = started.elapsed().as_millis() as u64,
        "merge committed"
    );

    Ok(result)
}

async fn apply<X>(
    transaction: &mut X,
    records: Vec<ChangeRecord>,
    result: &mut MergeResult,
) -> EtlResult<()>
where
    X: MergeTransaction + Send,
{
    let keys: Vec<RegistrationKey> = records.iter().map(|record| record.key().clone()).collect();
    let matched: HashSet<RegistrationKey> = transaction.matched_keys(&keys).await?;

    debug!(
        keys = keys.len(),
        matched = matched.len(),
        "matched staged keys against table"
    );

    for record in records {
        etl_fail_point(MERGE_ENGINE__BEFORE_OPERATION)?;

        let exists = matched.contains(record.key());
        match (record.modification.is_upsert(), exists) {
            (true, true) => {
                transaction.upsert(record).await?;
                result.updated += 1;
            }
            (true, false) => {
                transaction.upsert(record).await?;
                result.inserted += 1;
            }
            (false, true) => {
                transaction.delete(record.vehicle.registration).await?;
                result.deleted += 1;
            }
            (false, false) => {
                result.skipped_deletes += 1;
            }
        }
    }

    etl_fail_point(MERGE_ENGINE__BEFORE_COMMIT)?;

    Ok(())
}

fn record_metrics<T: AuthoritativeTable>(result: &MergeResult, started: Instant) {
    for (operation, rows) in [
        ("insert", result.inserted),
        ("update", result.updated),
        ("delete", result.deleted),
        ("skipped_delete", result.skipped_deletes),
    ] {
        counter!(
            MOTWOT_MERGE_ROWS_TOTAL,
            OPERATION_LABEL => operation,
            TABLE_LABEL => T::name(),
        )
        .increment(rows);
    }

    histogram!(MOTWOT_MERGE_DURATION_SECONDS, TABLE_LABEL => T::name())
        .record(started.elapsed().as_secs_f64());
}
