use serde::{Deserialize, Serialize};
use std::fmt;

/// Natural key of a vehicle: its registration plate, uppercased and without separators.
///
/// Plates arrive as `"ab12 cde"`, `"AB12-CDE"` or `"AB12CDE"`; all of them identify the same
/// vehicle and normalize to `AB12CDE`. Only ASCII letters and digits are kept.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegistrationKey(String);

impl RegistrationKey {
    /// Normalizes `raw` into a key, returning [`None`] when nothing identifying is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.is_empty() {
            return None;
        }

        Some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RegistrationKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RegistrationKey::parse(&value)
            .ok_or_else(|| format!("'{value}' is not a valid registration"))
    }
}

impl From<RegistrationKey> for String {
    fn from(key: RegistrationKey) -> Self {
        key.0
    }
}

impl AsRef<str> for RegistrationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
