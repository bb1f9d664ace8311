//! SQL identifier checks.
//!
//! Field, table and namespace names are interpolated into policy SQL and
//! session-variable names, so they are restricted to plain identifiers.

use crate::error::{Result, RlsError};

/// PostgreSQL truncates identifiers longer than this.
pub(crate) const PG_IDENT_MAX: usize = 63;

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes.
#[must_use]
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= PG_IDENT_MAX
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// # Errors
/// Returns `RlsError::Config` naming `what` when `name` is not a plain identifier.
pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if is_plain_identifier(name) {
        Ok(())
    } else {
        Err(RlsError::config(format!(
            "{what} '{name}' is not a valid SQL identifier"
        )))
    }
}

/// Double-quote a validated identifier, or each part of `schema.table`.
///
/// # Errors
/// Returns `RlsError::Config` if any part is not a plain identifier.
pub fn quote_qualified(what: &str, name: &str) -> Result<String> {
    let parts = name
        .split('.')
        .map(|part| {
            validate_identifier(what, part)?;
            Ok(format!("\"{part}\""))
        })
        .collect::<Result<Vec<_>>>()?;
    if parts.len() > 2 {
        return Err(RlsError::config(format!(
            "{what} '{name}' has too many qualifiers"
        )));
    }
    Ok(parts.join("."))
}
