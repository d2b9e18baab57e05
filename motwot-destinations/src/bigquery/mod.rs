mod client;
mod encoding;
mod executor;
mod metrics;
mod schema;
mod table;

pub use client::{BigQueryClient, BigQueryDatasetId, BigQueryProjectId, BigQueryTableId};
pub use executor::StatementExecutor;
pub use schema::{Column, ColumnType, PARTITION_COLUMN, VEHICLE_COLUMNS};
pub use table::{BigQueryBulkLoad, BigQueryMergeTransaction, BigQueryTable};
