//! The authoritative table runs merge into.
//!
//! [`AuthoritativeTable`] is the seam to the warehouse: a [`BulkLoad`] fills it with the initial
//! snapshot and [`MergeTransaction`]s apply each staged batch afterwards.

mod base;
pub mod memory;

pub use base::{AuthoritativeTable, BulkLoad, MergeTransaction};
