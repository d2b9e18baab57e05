//! Turning raw upstream records into [`ChangeRecord`]s.
//!
//! Partial vehicle data is normal upstream, so every field other than the registration degrades
//! to null when it is missing or unparseable. A record without a usable registration cannot be
//! keyed and fails the run with [`ErrorKind::NormalizationError`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{
    ChangeRecord, EnrichedRecord, Modification, RawRecord, RegistrationKey, TestEvent,
    TestResult, VehicleRecord,
};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y.%m.%d"];
const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Normalizes the records of one run.
///
/// Derived columns depend on the day the run processes its records, which is fixed at
/// construction so that every record of a run is enriched against the same date.
#[derive(Debug, Clone, Copy)]
pub struct RecordNormalizer {
    processing_date: NaiveDate,
    source_date: Option<NaiveDate>,
}

impl RecordNormalizer {
    pub fn new(processing_date: NaiveDate) -> Self {
        Self {
            processing_date,
            source_date: None,
        }
    }

    /// Stamps every normalized record with the day its extract describes.
    pub fn with_source_date(mut self, source_date: Option<NaiveDate>) -> Self {
        self.source_date = source_date;
        self
    }

    pub fn processing_date(&self) -> NaiveDate {
        self.processing_date
    }

    /// Normalizes a single raw record.
    pub fn normalize(&self, raw: &RawRecord) -> EtlResult<ChangeRecord> {
        let Some(registration) =
            string_field(raw, "registration").and_then(|raw| RegistrationKey::parse(&raw))
        else {
            bail!(
                ErrorKind::NormalizationError,
                "Record has no registration",
                format!("record fields: {}", field_names(raw))
            );
        };

        let modification = modification(raw, &registration);

        let mut mot_tests: Vec<TestEvent> = match raw.get("motTests") {
            Some(Value::Array(tests)) => tests
                .iter()
                .filter_map(Value::as_object)
                .map(test_event)
                .collect(),
            _ => Vec::new(),
        };
        // Stable, so events without a completion time keep their relative order at the front.
        mot_tests.sort_by_key(|test| test.completed_at);

        let first_used_date = date_field(raw, "firstUsedDate");
        let enriched = EnrichedRecord::derive(&mot_tests, first_used_date, self.processing_date);

        let vehicle = VehicleRecord {
            registration,
            make: string_field(raw, "make"),
            model: string_field(raw, "model"),
            primary_colour: string_field(raw, "primaryColour"),
            secondary_colour: string_field(raw, "secondaryColour"),
            fuel_type: string_field(raw, "fuelType"),
            engine_size: int_field(raw, "engineSize"),
            manufacture_date: date_field(raw, "manufactureDate"),
            registration_date: date_field(raw, "registrationDate"),
            first_used_date,
            last_mot_test_date: date_field(raw, "lastMotTestDate"),
            mot_tests,
        };

        Ok(ChangeRecord {
            modification,
            vehicle,
            enriched,
            source_date: self.source_date,
        })
    }
}

fn modification(raw: &RawRecord, registration: &RegistrationKey) -> Modification {
    match raw.get("modification") {
        None | Some(Value::Null) => Modification::default(),
        Some(Value::String(tag)) => Modification::parse(tag).unwrap_or_else(|| {
            warn!(
                %registration,
                tag = %tag,
                "unrecognized modification, treating record as updated"
            );
            Modification::default()
        }),
        Some(other) => {
            warn!(
                %registration,
                tag = %other,
                "non-textual modification, treating record as updated"
            );
            Modification::default()
        }
    }
}

fn test_event(raw: &RawRecord) -> TestEvent {
    TestEvent {
        completed_at: datetime_field(raw, "completedDate"),
        result: string_field(raw, "testResult").and_then(|result| TestResult::parse(&result)),
        odometer_value: int_field(raw, "odometerValue"),
        odometer_unit: string_field(raw, "odometerUnit"),
        test_type: string_field(raw, "testType"),
        mot_test_number: string_field(raw, "motTestNumber"),
        expiry_date: date_field(raw, "expiryDate"),
    }
}

fn field_names(raw: &RawRecord) -> String {
    raw.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Returns the trimmed text of a field, or [`None`] when it is absent, blank or not scalar.
fn string_field(raw: &RawRecord, name: &str) -> Option<String> {
    match raw.get(name)? {
        Value::String(value) => {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_owned())
        }
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

/// Returns a field as an integer, truncating fractional values toward zero.
fn int_field(raw: &RawRecord, name: &str) -> Option<i64> {
    match raw.get(name)? {
        Value::Number(value) => value
            .as_i64()
            .or_else(|| value.as_f64().and_then(truncate)),
        Value::String(value) => {
            let value = value.trim();
            value
                .parse::<i64>()
                .ok()
                .or_else(|| value.parse::<f64>().ok().and_then(truncate))
        }
        _ => None,
    }
}

fn truncate(value: f64) -> Option<i64> {
    let truncated = value.trunc();
    (truncated.is_finite() && truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64)
        .then_some(truncated as i64)
}

fn date_field(raw: &RawRecord, name: &str) -> Option<NaiveDate> {
    string_field(raw, name).and_then(|value| parse_date(&value))
}

fn datetime_field(raw: &RawRecord, name: &str) -> Option<DateTime<Utc>> {
    string_field(raw, name).and_then(|value| parse_datetime(&value))
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .or_else(|| parse_timestamp(value).map(|timestamp| timestamp.date_naive()))
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    parse_timestamp(value).or_else(|| {
        DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc())
    })
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NAIVE_DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|timestamp| timestamp.and_utc())
        })
}
