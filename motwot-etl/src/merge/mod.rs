//! Applying staged batches to the authoritative table.
//!
//! Every key of a batch is visited exactly once and handled by its modification tag and whether
//! the table already holds a row for it:
//!
//! | modification         | row exists         | row missing     |
//! |----------------------|--------------------|-----------------|
//! | `CREATED`, `UPDATED` | replace whole row  | insert row      |
//! | `DELETED`            | remove row         | nothing         |
//!
//! Keys that are not part of the batch are never touched. All operations of a batch are applied
//! through one [`crate::table::MergeTransaction`], so a failing merge leaves the table exactly as
//! it was.
//!
//! Bulk batches populate an empty or stale table instead: [`load_bulk`] streams them into a
//! [`crate::table::BulkLoad`] which replaces the table content as a whole.

mod bulk;
mod collapse;
mod engine;

pub use bulk::{BULK_LOAD_CHUNK_RECORDS, BulkLoadResult, load_bulk};
pub use collapse::collapse_duplicates;
pub use engine::{MergeResult, merge, merge_records};
