//! Daily synchronization of vehicle test history into an authoritative table.
//!
//! A run pulls the newest upstream delta archive, decodes its newline-delimited records,
//! normalizes each one into a [`types::ChangeRecord`], stages the batch on disk and merges it
//! into an [`table::AuthoritativeTable`] as a single all-or-nothing unit. The
//! [`pipeline::Pipeline`] drives these stages and guarantees that at most one run merges into a
//! table at a time.

pub mod decoder;
pub mod error;
pub mod failpoints;
pub mod lock;
mod macros;
pub mod merge;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod source;
pub mod staging;
pub mod table;
pub mod types;
