//! RLS value vocabulary and its database-safe encoding.
//!
//! Application data only ever carries [`ScalarValue`]s. Wildcards exist in the
//! resolved-context and session-variable layers and are written to PostgreSQL
//! as namespaced sentinel strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session-variable sentinel meaning "match every row" for one field.
pub const SPECIAL_CASE_ALL: &str = "SPECIAL_CASE_ALL";

/// Session-variable sentinel meaning "match no row" for one field.
pub const SPECIAL_CASE_NONE: &str = "SPECIAL_CASE_NONE";

/// Wildcard values understood by compiled policy clauses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wildcard {
    All,
    None,
}

impl Wildcard {
    /// The sentinel string stored in the session variable.
    #[must_use]
    pub const fn sentinel(self) -> &'static str {
        match self {
            Wildcard::All => SPECIAL_CASE_ALL,
            Wildcard::None => SPECIAL_CASE_NONE,
        }
    }
}

/// A plain application value an enforced column can be compared against.
///
/// Deserialization is untagged: JSON booleans and integers map directly,
/// strings in canonical UUID form become [`ScalarValue::Uuid`], every other
/// string stays text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Uuid(Uuid),
    Text(String),
}

impl ScalarValue {
    /// Text spelling a wildcard sentinel. Application data can never mean a
    /// wildcard, so such values are bound as `SPECIAL_CASE_NONE`.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        matches!(self, ScalarValue::Text(v) if v == SPECIAL_CASE_ALL || v == SPECIAL_CASE_NONE)
    }
}

/// A resolved per-field RLS value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RlsValue {
    Scalar(ScalarValue),
    Wildcard(Wildcard),
}

impl RlsValue {
    pub const ALL: RlsValue = RlsValue::Wildcard(Wildcard::All);
    pub const NONE: RlsValue = RlsValue::Wildcard(Wildcard::None);

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, RlsValue::Wildcard(_))
    }
}

/// The subset of values representable as a single session-variable string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DbSafeValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl DbSafeValue {
    /// Text form written into `current_setting(...)`.
    #[must_use]
    pub fn to_setting_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DbSafeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbSafeValue::Int(v) => write!(f, "{v}"),
            DbSafeValue::Bool(v) => write!(f, "{v}"),
            DbSafeValue::Text(v) => f.write_str(v),
        }
    }
}

/// Encode an RLS value into its database-safe form. Total.
///
/// A scalar spelling a sentinel encodes as `SPECIAL_CASE_NONE`; only
/// [`RlsValue::Wildcard`] can produce `SPECIAL_CASE_ALL`.
#[must_use]
pub fn encode(value: &RlsValue) -> DbSafeValue {
    match value {
        RlsValue::Scalar(scalar) if scalar.is_reserved() => {
            DbSafeValue::Text(SPECIAL_CASE_NONE.to_owned())
        }
        RlsValue::Scalar(ScalarValue::Int(v)) => DbSafeValue::Int(*v),
        RlsValue::Scalar(ScalarValue::Bool(v)) => DbSafeValue::Bool(*v),
        RlsValue::Scalar(ScalarValue::Uuid(v)) => DbSafeValue::Text(v.hyphenated().to_string()),
        RlsValue::Scalar(ScalarValue::Text(v)) => DbSafeValue::Text(v.clone()),
        RlsValue::Wildcard(w) => DbSafeValue::Text(w.sentinel().to_owned()),
    }
}

/// Absent values deny: `None` becomes `Wildcard::None`, never `Wildcard::All`.
#[must_use]
pub fn resolve_null(value: Option<RlsValue>) -> RlsValue {
    value.unwrap_or(RlsValue::NONE)
}

impl From<ScalarValue> for RlsValue {
    fn from(v: ScalarValue) -> Self {
        RlsValue::Scalar(v)
    }
}

impl From<Wildcard> for RlsValue {
    fn from(w: Wildcard) -> Self {
        RlsValue::Wildcard(w)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int(i64::from(v))
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<Uuid> for ScalarValue {
    fn from(v: Uuid) -> Self {
        ScalarValue::Uuid(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Text(v.to_owned())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Text(v)
    }
}

macro_rules! rls_value_from_scalar {
    ($($t:ty),*) => {
        $(
            impl From<$t> for RlsValue {
                fn from(v: $t) -> Self {
                    RlsValue::Scalar(ScalarValue::from(v))
                }
            }
        )*
    };
}

rls_value_from_scalar!(i64, i32, bool, Uuid, &str, String);

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn wildcards_encode_to_sentinels() {
        assert_eq!(
            encode(&RlsValue::ALL),
            DbSafeValue::Text("SPECIAL_CASE_ALL".to_owned())
        );
        assert_eq!(
            encode(&RlsValue::NONE),
            DbSafeValue::Text("SPECIAL_CASE_NONE".to_owned())
        );
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(encode(&RlsValue::from(100_i64)), DbSafeValue::Int(100));
        assert_eq!(encode(&RlsValue::from(true)), DbSafeValue::Bool(true));
        assert_eq!(
            encode(&RlsValue::from("acme")),
            DbSafeValue::Text("acme".to_owned())
        );
    }

    #[test]
    fn uuid_encodes_as_hyphenated_text() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            encode(&RlsValue::from(id)).to_setting_text(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn sentinel_text_never_encodes_as_all() {
        assert!(ScalarValue::from("SPECIAL_CASE_ALL").is_reserved());
        assert!(!ScalarValue::from("special_case_all").is_reserved());
        assert_eq!(
            encode(&RlsValue::from("SPECIAL_CASE_ALL")),
            DbSafeValue::Text("SPECIAL_CASE_NONE".to_owned())
        );
        assert_eq!(
            encode(&RlsValue::from("SPECIAL_CASE_NONE")),
            DbSafeValue::Text("SPECIAL_CASE_NONE".to_owned())
        );
    }

    #[test]
    fn missing_value_resolves_to_none_wildcard() {
        assert_eq!(resolve_null(None), RlsValue::NONE);
        assert_eq!(resolve_null(Some(RlsValue::from(7))), RlsValue::from(7));
    }

    #[test]
    fn setting_text_forms() {
        assert_eq!(DbSafeValue::Int(-3).to_setting_text(), "-3");
        assert_eq!(DbSafeValue::Bool(false).to_setting_text(), "false");
    }

    #[test]
    fn scalar_deserializes_untagged() {
        let v: Vec<ScalarValue> = serde_json::from_str(
            r#"[1, true, "550e8400-e29b-41d4-a716-446655440000", "plain"]"#,
        )
        .unwrap();
        assert_eq!(v[0], ScalarValue::Int(1));
        assert_eq!(v[1], ScalarValue::Bool(true));
        assert!(matches!(v[2], ScalarValue::Uuid(_)));
        assert_eq!(v[3], ScalarValue::Text("plain".to_owned()));
    }
}
