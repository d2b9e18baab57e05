//! Records flowing through a run.
//!
//! Upstream lines are parsed into [`VehicleRecord`]s, annotated with a [`Modification`] and the
//! derived [`EnrichedRecord`] columns, and travel through staging and merge as
//! [`ChangeRecord`]s keyed by [`RegistrationKey`].

mod change;
mod enriched;
mod key;
mod vehicle;

pub use change::*;
pub use enriched::*;
pub use key::*;
pub use vehicle::*;

/// A record exactly as delivered on one upstream line.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;
