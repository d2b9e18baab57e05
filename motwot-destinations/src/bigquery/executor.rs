use motwot_etl::error::EtlResult;
use std::future::Future;

/// Runs GoogleSQL statements to completion.
///
/// [`crate::bigquery::BigQueryTable`] issues all of its work through this trait. Both methods
/// return only once the statement has finished, successfully or not.
pub trait StatementExecutor {
    /// Runs a statement whose result rows are not needed.
    fn execute(&self, statement: String) -> impl Future<Output = EtlResult<()>> + Send;

    /// Runs a query and returns the value of the first column of every result row.
    fn query_column(
        &self,
        query: String,
    ) -> impl Future<Output = EtlResult<Vec<Option<String>>>> + Send;
}
