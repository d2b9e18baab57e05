use metrics::{counter, histogram};
use motwot_etl::error::{ErrorKind, EtlResult};
use motwot_etl::etl_error;
use motwot_etl::table::{AuthoritativeTable, BulkLoad, MergeTransaction};
use motwot_etl::types::{ChangeRecord, RegistrationKey};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::bigquery::client::{BigQueryClient, BigQueryDatasetId, BigQueryTableId};
use crate::bigquery::encoding::{delete_row, key_literal, upsert_row};
use crate::bigquery::executor::StatementExecutor;
use crate::bigquery::metrics::{
    BQ_MERGE_DURATION_SECONDS, BQ_STAGING_STATEMENTS_TOTAL, register_metrics,
};
use crate::bigquery::schema::{
    count_rows_statement, create_staging_table_statement, create_table_statement,
    drop_table_statement, insert_staged_rows_statement, matched_keys_statement, merge_statement,
    replace_from_staging_statement,
};

/// Upper bound for the size of a single statement, below the GoogleSQL query length limit.
const MAX_STATEMENT_BYTES: usize = 900_000;

/// Number of keys looked up per query.
const MATCHED_KEYS_CHUNK_SIZE: usize = 5_000;

/// Suffix of the staging table next to the authoritative table.
const STAGING_TABLE_SUFFIX: &str = "_staging";

/// Authoritative table stored in BigQuery.
///
/// Changes are first loaded into a staging table next to the table and then applied with one
/// statement, a `merge` for deltas and a `create or replace ... as select` for bulk loads. Both
/// are atomic, so readers see either the previous or the new content of the table.
#[derive(Debug, Clone)]
pub struct BigQueryTable<E = BigQueryClient> {
    executor: E,
    table: String,
    staging_table: String,
}

impl BigQueryTable<BigQueryClient> {
    pub fn new(
        client: BigQueryClient,
        dataset_id: BigQueryDatasetId,
        table_id: BigQueryTableId,
    ) -> EtlResult<Self> {
        let table = client.full_table_name(&dataset_id, &table_id)?;
        let staging_table_id = format!("{table_id}{STAGING_TABLE_SUFFIX}");
        let staging_table = client.full_table_name(&dataset_id, &staging_table_id)?;

        Ok(Self::with_executor(client, table, staging_table))
    }

    /// Creates a table handle authenticating with a service account key JSON string.
    pub async fn new_with_key(
        project_id: String,
        dataset_id: BigQueryDatasetId,
        table_id: BigQueryTableId,
        sa_key: &str,
    ) -> EtlResult<Self> {
        let client = BigQueryClient::new_with_key(project_id, sa_key).await?;

        Self::new(client, dataset_id, table_id)
    }
}

impl<E> BigQueryTable<E>
where
    E: StatementExecutor,
{
    /// Creates a table handle issuing its statements through `executor`.
    ///
    /// `table` and `staging_table` are fully qualified, quoted table names.
    pub fn with_executor(executor: E, table: String, staging_table: String) -> Self {
        register_metrics();

        Self {
            executor,
            table,
            staging_table,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Creates the authoritative table unless it exists.
    pub async fn ensure_table(&self) -> EtlResult<()> {
        self.executor
            .execute(create_table_statement(&self.table))
            .await
    }

    /// Replaces the staging table with an empty one.
    async fn create_staging(&self) -> EtlResult<()> {
        self.executor
            .execute(create_staging_table_statement(&self.staging_table))
            .await
    }

    /// Appends `rows` to the staging table, numbering them from `first_order`.
    async fn append_staging(&self, rows: &[String], first_order: u64) -> EtlResult<()> {
        let mut order = first_order;
        for chunk in chunk_by_size(rows, MAX_STATEMENT_BYTES) {
            self.executor
                .execute(insert_staged_rows_statement(&self.staging_table, chunk, order))
                .await?;
            counter!(BQ_STAGING_STATEMENTS_TOTAL).increment(1);
            order += chunk.len() as u64;
        }

        debug!(staging_table = %self.staging_table, rows = rows.len(), "staging rows loaded");

        Ok(())
    }

    /// Drops the staging table, logging instead of failing.
    async fn drop_staging(&self) {
        if let Err(err) = self
            .executor
            .execute(drop_table_statement(&self.staging_table))
            .await
        {
            warn!(table = %self.staging_table, error = %err, "failed to drop staging table");
        }
    }

    async fn row_count(&self) -> EtlResult<u64> {
        let values = self
            .executor
            .query_column(count_rows_statement(&self.table))
            .await?;

        values
            .into_iter()
            .next()
            .flatten()
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| {
                etl_error!(
                    ErrorKind::DestinationQueryFailed,
                    "Row count could not be read",
                    self.table.clone()
                )
            })
    }
}

impl<E> AuthoritativeTable for BigQueryTable<E>
where
    E: StatementExecutor + Clone + Send + Sync,
{
    type Transaction = BigQueryMergeTransaction<E>;
    type Load = BigQueryBulkLoad<E>;

    fn name() -> &'static str {
        "big_query"
    }

    async fn begin_replace(&self) -> EtlResult<BigQueryBulkLoad<E>> {
        info!(table = %self.table, "starting bigquery bulk load");
        self.create_staging().await?;

        Ok(BigQueryBulkLoad {
            table: self.clone(),
            staged_rows: 0,
            started: Instant::now(),
        })
    }

    async fn begin_merge(&self) -> EtlResult<BigQueryMergeTransaction<E>> {
        self.ensure_table().await?;

        Ok(BigQueryMergeTransaction {
            table: self.clone(),
            rows: Vec::new(),
        })
    }
}

/// Bulk load streaming rows into the staging table.
///
/// The authoritative table is replaced in one statement by [`BulkLoad::finish`].
#[derive(Debug)]
pub struct BigQueryBulkLoad<E = BigQueryClient> {
    table: BigQueryTable<E>,
    staged_rows: u64,
    started: Instant,
}

impl<E> BigQueryBulkLoad<E>
where
    E: StatementExecutor,
{
    async fn replace_table(&self) -> EtlResult<u64> {
        self.table
            .executor
            .execute(replace_from_staging_statement(
                &self.table.table,
                &self.table.staging_table,
            ))
            .await?;

        self.table.row_count().await
    }
}

impl<E> BulkLoad for BigQueryBulkLoad<E>
where
    E: StatementExecutor + Send + Sync,
{
    async fn append(&mut self, records: Vec<ChangeRecord>) -> EtlResult<()> {
        let rows = records
            .iter()
            .map(upsert_row)
            .collect::<EtlResult<Vec<_>>>()?;

        self.table.append_staging(&rows, self.staged_rows).await?;
        self.staged_rows += rows.len() as u64;

        Ok(())
    }

    async fn finish(self) -> EtlResult<u64> {
        info!(
            table = %self.table.table,
            staged_rows = self.staged_rows,
            "replacing bigquery table content"
        );

        let result = self.replace_table().await;
        self.table.drop_staging().await;

        histogram!(BQ_MERGE_DURATION_SECONDS).record(self.started.elapsed().as_secs_f64());

        result
    }

    async fn abort(self) -> EtlResult<()> {
        debug!(staged_rows = self.staged_rows, "aborting bigquery bulk load");
        self.table.drop_staging().await;

        Ok(())
    }
}

/// Merge transaction buffering changes until commit.
///
/// Nothing reaches BigQuery before [`MergeTransaction::commit`], so rolling back or dropping the
/// transaction leaves the table untouched.
#[derive(Debug)]
pub struct BigQueryMergeTransaction<E = BigQueryClient> {
    table: BigQueryTable<E>,
    rows: Vec<String>,
}

impl<E> BigQueryMergeTransaction<E>
where
    E: StatementExecutor,
{
    async fn apply_through_staging(&self) -> EtlResult<()> {
        self.table.create_staging().await?;
        self.table.append_staging(&self.rows, 0).await?;

        self.table
            .executor
            .execute(merge_statement(&self.table.table, &self.table.staging_table))
            .await
    }
}

impl<E> MergeTransaction for BigQueryMergeTransaction<E>
where
    E: StatementExecutor + Send + Sync,
{
    async fn matched_keys(
        &mut self,
        keys: &[RegistrationKey],
    ) -> EtlResult<HashSet<RegistrationKey>> {
        let mut matched = HashSet::new();

        for chunk in keys.chunks(MATCHED_KEYS_CHUNK_SIZE) {
            let literals: Vec<String> = chunk.iter().map(key_literal).collect();
            let values = self
                .table
                .executor
                .query_column(matched_keys_statement(&self.table.table, &literals))
                .await?;

            matched.extend(
                values
                    .iter()
                    .filter_map(|value| value.as_deref().and_then(RegistrationKey::parse)),
            );
        }

        Ok(matched)
    }

    async fn upsert(&mut self, record: ChangeRecord) -> EtlResult<()> {
        self.rows.push(upsert_row(&record)?);

        Ok(())
    }

    async fn delete(&mut self, key: RegistrationKey) -> EtlResult<()> {
        self.rows.push(delete_row(&key)?);

        Ok(())
    }

    async fn commit(self) -> EtlResult<()> {
        if self.rows.is_empty() {
            return Ok(());
        }

        info!(
            table = %self.table.table,
            rows = self.rows.len(),
            "merging staged rows into bigquery"
        );
        let started = Instant::now();

        let result = self.apply_through_staging().await;
        self.table.drop_staging().await;

        histogram!(BQ_MERGE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        result
    }

    async fn rollback(self) -> EtlResult<()> {
        debug!(rows = self.rows.len(), "discarding buffered bigquery changes");

        Ok(())
    }
}

/// Splits `rows` into consecutive chunks whose total length stays within `max_bytes`.
///
/// A row longer than `max_bytes` forms a chunk of its own.
fn chunk_by_size(rows: &[String], max_bytes: usize) -> Vec<&[String]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut size = 0;

    for (index, row) in rows.iter().enumerate() {
        // Rows are joined with ", ".
        let row_size = row.len() + 2;
        if index > start && size + row_size > max_bytes {
            chunks.push(&rows[start..index]);
            start = index;
            size = 0;
        }
        size += row_size;
    }

    if start < rows.len() {
        chunks.push(&rows[start..]);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use motwot_etl::types::{EnrichedRecord, Modification, VehicleRecord};
    use std::sync::{Arc, Mutex};

    const TABLE: &str = "`p.d.vehicles`";
    const STAGING_TABLE: &str = "`p.d.vehicles_staging`";

    /// Records statements instead of running them, failing those starting with `fail_prefix`.
    #[derive(Debug, Clone, Default)]
    struct RecordingExecutor {
        statements: Arc<Mutex<Vec<String>>>,
        fail_prefix: Option<&'static str>,
        column: Vec<Option<String>>,
    }

    impl RecordingExecutor {
        fn failing_on(prefix: &'static str) -> Self {
            Self {
                fail_prefix: Some(prefix),
                ..Self::default()
            }
        }

        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }

        /// First word of every statement run so far.
        fn verbs(&self) -> Vec<String> {
            self.statements()
                .iter()
                .map(|statement| statement.split_whitespace().next().unwrap().to_owned())
                .collect()
        }
    }

    impl StatementExecutor for RecordingExecutor {
        async fn execute(&self, statement: String) -> EtlResult<()> {
            self.statements.lock().unwrap().push(statement.clone());

            if let Some(prefix) = self.fail_prefix
                && statement.starts_with(prefix)
            {
                return Err(etl_error!(
                    ErrorKind::DestinationQueryFailed,
                    "Statement failed"
                ));
            }

            Ok(())
        }

        async fn query_column(&self, query: String) -> EtlResult<Vec<Option<String>>> {
            self.statements.lock().unwrap().push(query);

            Ok(self.column.clone())
        }
    }

    fn table(executor: &RecordingExecutor) -> BigQueryTable<RecordingExecutor> {
        BigQueryTable::with_executor(executor.clone(), TABLE.to_owned(), STAGING_TABLE.to_owned())
    }

    fn record(registration: &str) -> ChangeRecord {
        let vehicle = VehicleRecord::new(RegistrationKey::parse(registration).unwrap());
        ChangeRecord {
            modification: Modification::Created,
            enriched: EnrichedRecord::derive(
                &vehicle.mot_tests,
                None,
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            ),
            vehicle,
            source_date: None,
        }
    }

    fn key(registration: &str) -> RegistrationKey {
        RegistrationKey::parse(registration).unwrap()
    }

    fn rows(sizes: &[usize]) -> Vec<String> {
        sizes.iter().map(|size| "x".repeat(*size)).collect()
    }

    #[tokio::test]
    async fn commit_stages_merges_and_drops_staging() {
        let executor = RecordingExecutor::default();

        let mut transaction = table(&executor).begin_merge().await.unwrap();
        transaction.upsert(record("A1")).await.unwrap();
        transaction.delete(key("B2")).await.unwrap();
        transaction.commit().await.unwrap();

        assert_eq!(
            executor.verbs(),
            ["create", "create", "insert", "merge", "drop"]
        );
        let statements = executor.statements();
        assert!(statements[0].starts_with("create table if not exists `p.d.vehicles`"));
        assert!(statements[1].starts_with("create or replace table `p.d.vehicles_staging`"));
        assert!(statements[3].starts_with("merge `p.d.vehicles` t using `p.d.vehicles_staging` s"));
        assert_eq!(statements[4], "drop table if exists `p.d.vehicles_staging`");
    }

    #[tokio::test]
    async fn failed_staging_load_skips_merge_and_drops_staging() {
        let executor = RecordingExecutor::failing_on("insert");

        let mut transaction = table(&executor).begin_merge().await.unwrap();
        transaction.upsert(record("A1")).await.unwrap();
        let err = transaction.commit().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
        assert_eq!(executor.verbs(), ["create", "create", "insert", "drop"]);
    }

    #[tokio::test]
    async fn failed_merge_still_drops_staging() {
        let executor = RecordingExecutor::failing_on("merge");

        let mut transaction = table(&executor).begin_merge().await.unwrap();
        transaction.upsert(record("A1")).await.unwrap();
        assert!(transaction.commit().await.is_err());

        assert_eq!(executor.verbs().last().map(String::as_str), Some("drop"));
    }

    #[tokio::test]
    async fn empty_commit_and_rollback_touch_nothing() {
        let executor = RecordingExecutor::default();
        let table = table(&executor);

        table.begin_merge().await.unwrap().commit().await.unwrap();
        let mut transaction = table.begin_merge().await.unwrap();
        transaction.upsert(record("A1")).await.unwrap();
        transaction.rollback().await.unwrap();

        assert_eq!(executor.verbs(), ["create", "create"]);
    }

    #[tokio::test]
    async fn matched_keys_reads_the_key_column() {
        let executor = RecordingExecutor {
            column: vec![Some("A1".to_owned()), None, Some("".to_owned())],
            ..RecordingExecutor::default()
        };

        let mut transaction = table(&executor).begin_merge().await.unwrap();
        let matched = transaction
            .matched_keys(&[key("A1"), key("C3")])
            .await
            .unwrap();

        assert_eq!(matched, HashSet::from([key("A1")]));
        assert_eq!(
            executor.statements().last().unwrap(),
            "select `registration` from `p.d.vehicles` where `registration` in ('A1', 'C3')"
        );
    }

    #[tokio::test]
    async fn bulk_load_numbers_rows_across_chunks() {
        let executor = RecordingExecutor {
            column: vec![Some("3".to_owned())],
            ..RecordingExecutor::default()
        };

        let mut load = table(&executor).begin_replace().await.unwrap();
        load.append(vec![record("A1"), record("B2")]).await.unwrap();
        load.append(vec![record("A1")]).await.unwrap();
        let rows = load.finish().await.unwrap();

        assert_eq!(rows, 3);
        assert_eq!(
            executor.verbs(),
            ["create", "insert", "insert", "create", "select", "drop"]
        );
        let statements = executor.statements();
        assert!(statements[1].contains("0 + o as `staged_order`"));
        assert!(statements[2].contains("2 + o as `staged_order`"));
        assert!(statements[3].starts_with("create or replace table `p.d.vehicles` ("));
        assert_eq!(statements[4], "select count(*) from `p.d.vehicles`");
    }

    #[tokio::test]
    async fn failed_replace_drops_staging() {
        let executor = RecordingExecutor::failing_on("create or replace table `p.d.vehicles` (");

        let mut load = table(&executor).begin_replace().await.unwrap();
        load.append(vec![record("A1")]).await.unwrap();
        let err = load.finish().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
        assert_eq!(executor.verbs(), ["create", "insert", "create", "drop"]);
    }

    #[tokio::test]
    async fn aborted_load_drops_staging() {
        let executor = RecordingExecutor::default();

        let load = table(&executor).begin_replace().await.unwrap();
        load.abort().await.unwrap();

        assert_eq!(executor.verbs(), ["create", "drop"]);
    }

    #[tokio::test]
    async fn unreadable_row_count_fails_the_load() {
        let executor = RecordingExecutor::default();

        let load = table(&executor).begin_replace().await.unwrap();
        let err = load.finish().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
    }

    #[test]
    fn chunks_respect_the_size_budget() {
        let rows = rows(&[4, 4, 4, 4, 4]);

        let chunks = chunk_by_size(&rows, 12);

        assert_eq!(
            chunks.iter().map(|chunk| chunk.len()).collect::<Vec<_>>(),
            [2, 2, 1]
        );
    }

    #[test]
    fn oversized_rows_get_their_own_chunk() {
        let rows = rows(&[2, 50, 2]);

        let chunks = chunk_by_size(&rows, 10);

        assert_eq!(
            chunks.iter().map(|chunk| chunk.len()).collect::<Vec<_>>(),
            [1, 1, 1]
        );
    }

    #[test]
    fn no_rows_no_chunks() {
        assert!(chunk_by_size(&[], 10).is_empty());
    }
}
