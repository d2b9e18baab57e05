use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{TestEvent, TestResult};

/// Value of `last_test_result` for a vehicle without any test.
pub const NEVER_MOT: &str = "NEVER MOT";

/// Columns derived from a vehicle's test history.
///
/// Derived values are recomputed for every change record so that downstream readers never see
/// them out of step with the history they summarize.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub last_test_date: Option<NaiveDate>,
    pub last_test_result: Option<String>,
    pub mileage: Option<i64>,
    pub vehicle_age: Option<u32>,
    pub pass_count: u32,
    pub fail_count: u32,
    pub mot_test_count: u32,
}

impl EnrichedRecord {
    /// Derives the columns from `tests`, which must already be in ascending completion order.
    ///
    /// `vehicle_age` counts whole years from `first_used_date` to `processing_date` and is
    /// [`None`] without a first-used date or when that date lies after `processing_date`.
    pub fn derive(
        tests: &[TestEvent],
        first_used_date: Option<NaiveDate>,
        processing_date: NaiveDate,
    ) -> Self {
        let latest = tests.last();

        let last_test_result = match latest {
            None => Some(NEVER_MOT.to_owned()),
            Some(test) => test.result.map(|result| result.as_str().to_owned()),
        };

        let count = |expected: TestResult| {
            tests
                .iter()
                .filter(|test| test.result == Some(expected))
                .count() as u32
        };

        Self {
            last_test_date: latest
                .and_then(|test| test.completed_at)
                .map(|completed_at| completed_at.date_naive()),
            last_test_result,
            mileage: latest.and_then(|test| test.odometer_value),
            vehicle_age: first_used_date.and_then(|date| processing_date.years_since(date)),
            pass_count: count(TestResult::Passed),
            fail_count: count(TestResult::Failed),
            mot_test_count: tests.len() as u32,
        }
    }
}
