use motwot_etl::error::EtlResult;
use motwot_etl::types::{ChangeRecord, RegistrationKey};
use serde_json::json;

use crate::bigquery::schema::{DELETED, KEY_COLUMN, MODIFICATION_COLUMN};

/// Quotes `value` as a GoogleSQL string literal.
pub fn string_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');

    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            ch if ch.is_control() => quoted.push_str(&format!("\\u{:04x}", ch as u32)),
            ch => quoted.push(ch),
        }
    }

    quoted.push('\'');
    quoted
}

/// Staging row replacing the whole table row of `record`.
pub fn upsert_row(record: &ChangeRecord) -> EtlResult<String> {
    Ok(string_literal(&serde_json::to_string(record)?))
}

/// Staging row removing the table row of `key`.
pub fn delete_row(key: &RegistrationKey) -> EtlResult<String> {
    let row = json!({
        KEY_COLUMN: key.as_str(),
        MODIFICATION_COLUMN: DELETED,
    });

    Ok(string_literal(&serde_json::to_string(&row)?))
}

pub fn key_literal(key: &RegistrationKey) -> String {
    string_literal(key.as_str())
}
