use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::RegistrationKey;

/// Outcome of a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestResult {
    Passed,
    Failed,
}

impl TestResult {
    /// Parses the upstream spelling of a result, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("PASSED") {
            Some(TestResult::Passed)
        } else if raw.eq_ignore_ascii_case("FAILED") {
            Some(TestResult::Failed)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestResult::Passed => "PASSED",
            TestResult::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One roadworthiness test in a vehicle's history.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestEvent {
    pub completed_at: Option<DateTime<Utc>>,
    /// [`None`] when upstream reported a result other than passed or failed.
    pub result: Option<TestResult>,
    pub odometer_value: Option<i64>,
    pub odometer_unit: Option<String>,
    pub test_type: Option<String>,
    pub mot_test_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

/// A vehicle and its test history.
///
/// `mot_tests` is ordered by completion time ascending, so the last element is the most recent
/// test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub registration: RegistrationKey,
    pub make: Option<String>,
    pub model: Option<String>,
    pub primary_colour: Option<String>,
    pub secondary_colour: Option<String>,
    pub fuel_type: Option<String>,
    pub engine_size: Option<i64>,
    pub manufacture_date: Option<NaiveDate>,
    pub registration_date: Option<NaiveDate>,
    pub first_used_date: Option<NaiveDate>,
    pub last_mot_test_date: Option<NaiveDate>,
    #[serde(default)]
    pub mot_tests: Vec<TestEvent>,
}

impl VehicleRecord {
    /// Creates a record that only carries its key.
    pub fn new(registration: RegistrationKey) -> Self {
        Self {
            registration,
            make: None,
            model: None,
            primary_colour: None,
            secondary_colour: None,
            fuel_type: None,
            engine_size: None,
            manufacture_date: None,
            registration_date: None,
            first_used_date: None,
            last_mot_test_date: None,
            mot_tests: Vec::new(),
        }
    }

    /// Returns the most recent test, if the vehicle was ever tested.
    pub fn latest_test(&self) -> Option<&TestEvent> {
        self.mot_tests.last()
    }
}
