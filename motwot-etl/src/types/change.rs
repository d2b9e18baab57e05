use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{EnrichedRecord, RegistrationKey, VehicleRecord};

/// How a change record affects the authoritative table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modification {
    Created,
    /// Records without an explicit tag are treated as updates.
    #[default]
    Updated,
    Deleted,
}

impl Modification {
    /// Parses the upstream tag, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("CREATED") {
            Some(Modification::Created)
        } else if raw.eq_ignore_ascii_case("UPDATED") {
            Some(Modification::Updated)
        } else if raw.eq_ignore_ascii_case("DELETED") {
            Some(Modification::Deleted)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Modification::Created => "CREATED",
            Modification::Updated => "UPDATED",
            Modification::Deleted => "DELETED",
        }
    }

    /// Returns `true` for tags that write the record's values into the table.
    pub fn is_upsert(&self) -> bool {
        !matches!(self, Modification::Deleted)
    }
}

impl fmt::Display for Modification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized vehicle together with its change tag and derived columns.
///
/// This is both the unit written to a staged batch (one JSON line per record) and the row shape
/// of the authoritative table, so an upsert replaces every column of a row at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub modification: Modification,
    #[serde(flatten)]
    pub vehicle: VehicleRecord,
    #[serde(flatten)]
    pub enriched: EnrichedRecord,
    /// Day the upstream extract describes, when it is known.
    pub source_date: Option<NaiveDate>,
}

impl ChangeRecord {
    pub fn key(&self) -> &RegistrationKey {
        &self.vehicle.registration
    }
}
