use std::collections::HashSet;
use std::future::Future;

use crate::error::EtlResult;
use crate::types::{ChangeRecord, RegistrationKey};

/// A table holding at most one row per [`RegistrationKey`].
///
/// Rows are [`ChangeRecord`]s including their derived columns. The table is only ever changed
/// through a [`BulkLoad`] when it is first populated, and through committed
/// [`MergeTransaction`]s afterwards.
pub trait AuthoritativeTable {
    /// Transaction type returned by [`AuthoritativeTable::begin_merge`].
    type Transaction: MergeTransaction + Send;

    /// Load type returned by [`AuthoritativeTable::begin_replace`].
    type Load: BulkLoad + Send;

    /// Returns the name of the table implementation.
    fn name() -> &'static str;

    /// Starts replacing the whole content of the table.
    ///
    /// Used to populate the table from a bulk snapshot, which arrives in chunks through
    /// [`BulkLoad::append`].
    fn begin_replace(&self) -> impl Future<Output = EtlResult<Self::Load>> + Send;

    /// Opens a transaction for applying one staged batch.
    ///
    /// Nothing written through the transaction is visible to readers of the table before
    /// [`MergeTransaction::commit`] succeeds.
    fn begin_merge(&self) -> impl Future<Output = EtlResult<Self::Transaction>> + Send;
}

/// Keyed upserts and deletes applied to an [`AuthoritativeTable`] as one unit.
///
/// A transaction is consumed by either [`MergeTransaction::commit`] or
/// [`MergeTransaction::rollback`]. Implementations must leave the table untouched when a
/// transaction is rolled back, and also when it is dropped without being committed.
pub trait MergeTransaction {
    /// Returns which of `keys` have a row in the table as of the start of the transaction.
    fn matched_keys(
        &mut self,
        keys: &[RegistrationKey],
    ) -> impl Future<Output = EtlResult<HashSet<RegistrationKey>>> + Send;

    /// Inserts `record`, or replaces every column of the row with its key.
    fn upsert(&mut self, record: ChangeRecord) -> impl Future<Output = EtlResult<()>> + Send;

    /// Removes the row with `key`, if there is one.
    fn delete(&mut self, key: RegistrationKey) -> impl Future<Output = EtlResult<()>> + Send;

    /// Makes every operation of the transaction visible at once.
    fn commit(self) -> impl Future<Output = EtlResult<()>> + Send;

    /// Discards every operation of the transaction.
    fn rollback(self) -> impl Future<Output = EtlResult<()>> + Send;
}

/// Rows replacing the content of an [`AuthoritativeTable`], delivered in chunks.
///
/// When the same key is appended more than once the record appended last wins, across chunks
/// too. The table keeps its previous content until [`BulkLoad::finish`] succeeds, and when the
/// load is aborted or dropped.
pub trait BulkLoad {
    /// Adds `records` to the load.
    fn append(
        &mut self,
        records: Vec<ChangeRecord>,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Swaps the table content for the loaded rows and returns the number of rows it now holds.
    fn finish(self) -> impl Future<Output = EtlResult<u64>> + Send;

    /// Discards the loaded rows.
    fn abort(self) -> impl Future<Output = EtlResult<()>> + Send;
}
