//! Policy clause compiler.
//!
//! Builds the boolean expression used in both `USING` and `WITH CHECK` of a
//! table's policy. Each enforced field collapses the session variable state
//! into two-valued logic:
//!
//! | `current_setting('<ns>.<field>', true)` | result |
//! |---|---|
//! | SQL `NULL` (never set)                  | `FALSE` |
//! | `'SPECIAL_CASE_NONE'`                   | `FALSE` |
//! | `'SPECIAL_CASE_ALL'`                    | `TRUE`  |
//! | anything else                           | `"<field>" = value::<type>` |
//!
//! Per-field expressions are ANDed. An empty string (a variable that was
//! reset) is turned into `NULL` before the cast, so the comparison yields
//! `NULL` and the row is denied.
//!
//! Only schema-sourced identifiers reach this module, and they are validated
//! again here; values never appear in the SQL text.

mod sql_type;

use serde::{Deserialize, Serialize};

pub use sql_type::SqlType;

use crate::error::{Result, RlsError};
use crate::ident::validate_identifier;
use crate::value::Wildcard;

/// One enforced column of a table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyField {
    pub name: String,
    pub sql_type: SqlType,
}

impl PolicyField {
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
        }
    }
}

/// Expression for a single field.
///
/// # Errors
/// Returns `RlsError::Config` if the prefix or field name is not a plain identifier.
pub fn compile_field(prefix: &str, field: &PolicyField) -> Result<String> {
    validate_identifier("session namespace prefix", prefix)?;
    validate_identifier("policy field", &field.name)?;

    let name = &field.name;
    let setting = format!("current_setting('{prefix}.{name}', true)");
    let none = Wildcard::None.sentinel();
    let all = Wildcard::All.sentinel();
    let cast = field.sql_type.cast_target();

    Ok(format!(
        "(CASE\n    \
         WHEN {setting} IS NULL THEN FALSE\n    \
         WHEN {setting} = '{none}' THEN FALSE\n    \
         WHEN {setting} = '{all}' THEN TRUE\n    \
         ELSE \"{name}\" = NULLIF({setting}, '')::{cast}\n\
         END)"
    ))
}

/// Conjunction of [`compile_field`] over `fields`, in the given order.
///
/// Output is deterministic: the same input always yields byte-identical SQL.
///
/// # Errors
/// Returns `RlsError::Config` if `fields` is empty, contains duplicates, or an identifier is invalid.
pub fn compile_clause(prefix: &str, fields: &[PolicyField]) -> Result<String> {
    if fields.is_empty() {
        return Err(RlsError::config("policy clause needs at least one field"));
    }

    let mut out = String::new();
    for (idx, field) in fields.iter().enumerate() {
        if fields[..idx].iter().any(|f| f.name == field.name) {
            return Err(RlsError::config(format!(
                "field '{}' listed twice in policy",
                field.name
            )));
        }
        if idx > 0 {
            out.push_str(" AND\n");
        }
        out.push_str(&compile_field(prefix, field)?);
    }
    Ok(out)
}
