use std::fmt;

use serde::{Deserialize, Serialize};

/// Cast target for the session-variable text in a policy clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Int,
    BigInt,
    Uuid,
    Boolean,
    Text,
}

impl SqlType {
    #[must_use]
    pub const fn cast_target(self) -> &'static str {
        match self {
            SqlType::Int => "int",
            SqlType::BigInt => "bigint",
            SqlType::Uuid => "uuid",
            SqlType::Boolean => "boolean",
            SqlType::Text => "text",
        }
    }

    /// Map a column type name to its cast target.
    ///
    /// Accepts ORM field kinds (`IntegerField`, `UUIDField`, ...) and native
    /// PostgreSQL names (`int4`, `uuid`, `varchar`, ...). Anything unknown is
    /// compared as `text`.
    #[must_use]
    pub fn from_type_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "integerfield"
            | "smallintegerfield"
            | "positiveintegerfield"
            | "positivesmallintegerfield"
            | "autofield"
            | "smallautofield"
            | "int"
            | "int2"
            | "int4"
            | "integer"
            | "smallint"
            | "serial" => SqlType::Int,
            "bigintegerfield" | "positivebigintegerfield" | "bigautofield" | "int8" | "bigint"
            | "bigserial" => SqlType::BigInt,
            "uuidfield" | "uuid" => SqlType::Uuid,
            "booleanfield" | "bool" | "boolean" => SqlType::Boolean,
            _ => SqlType::Text,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cast_target())
    }
}
