//! Identifier validation for PostgreSQL query safety.
//!
//! Schema names arrive from model output (candidate queries carry the schema
//! they ran against) and end up interpolated into `SET LOCAL search_path`
//! statements, which cannot take bind parameters. These functions validate
//! the identifier before it is quoted into such a statement.

use crate::ClinicError;

/// PostgreSQL identifiers are truncated at 63 bytes; longer input is noise.
const MAX_IDENT_LEN: usize = 63;

fn is_valid_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Validate that `schema` is a safe PostgreSQL identifier.
///
/// Returns the identifier unchanged if valid.
/// Returns `ClinicError::Validation` otherwise.
pub fn validate_schema_name(schema: &str) -> Result<&str, ClinicError> {
    if schema.is_empty() || schema.len() > MAX_IDENT_LEN {
        return Err(ClinicError::Validation(format!(
            "Invalid schema name '{}': must be 1-{} characters",
            schema, MAX_IDENT_LEN
        )));
    }

    let mut chars = schema.chars();
    let first = chars.next().unwrap_or('\0');
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(ClinicError::Validation(format!(
            "Invalid schema name '{}': must start with a letter or underscore",
            schema
        )));
    }

    if !chars.all(is_valid_ident_char) {
        return Err(ClinicError::Validation(format!(
            "Invalid schema name '{}': only alphanumerics, underscores and '$' are allowed",
            schema
        )));
    }

    Ok(schema)
}

/// Double-quote an identifier for interpolation into SQL text.
///
/// Callers are expected to have validated the identifier first; quoting is
/// kept anyway so an embedded quote can never terminate the string.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
