use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required setting is empty.
    #[error("`{0}` cannot be empty")]
    EmptyField(&'static str),
    /// A setting that must be a URL is not one.
    #[error("`{field}` must be an http or https URL, got `{value}`")]
    InvalidUrl { field: &'static str, value: String },
    /// The staging write buffer cannot be zero.
    #[error("`staging.write_buffer_bytes` cannot be zero")]
    WriteBufferBytesZero,
}

/// Checks that `value` is not blank.
pub(crate) fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }

    Ok(())
}

/// Checks that `value` looks like an http(s) URL.
pub(crate) fn require_http_url(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let has_scheme = value.starts_with("https://") || value.starts_with("http://");
    let has_host = value
        .split_once("://")
        .is_some_and(|(_, rest)| !rest.is_empty());

    if !has_scheme || !has_host {
        return Err(ValidationError::InvalidUrl {
            field,
            value: value.to_owned(),
        });
    }

    Ok(())
}
