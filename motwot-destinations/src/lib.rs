//! Warehouse implementations of the authoritative table.
//!
//! The in-memory table lives in `motwot-etl`; this crate holds the tables backed by real
//! warehouses, each behind a cargo feature.

#[cfg(feature = "bigquery")]
pub mod bigquery;
