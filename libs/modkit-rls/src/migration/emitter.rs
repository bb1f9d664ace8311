use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::compiler::{PolicyField, compile_clause};
use crate::error::Result;
use crate::ident::{PG_IDENT_MAX, quote_qualified, validate_identifier};

const POLICY_SUFFIX: &str = "_rls_policy";
const HASH_LEN: usize = 8;

/// One table's policy: which fields it enforces and under which namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    /// Table name, optionally `schema.table`.
    pub table: String,
    pub fields: Vec<PolicyField>,
    pub namespace_prefix: String,
}

impl PolicyDefinition {
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        fields: Vec<PolicyField>,
        namespace_prefix: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            fields,
            namespace_prefix: namespace_prefix.into(),
        }
    }

    /// `<table>_rls_policy`, using the unqualified table name.
    ///
    /// Names that would exceed the 63-byte identifier limit become
    /// `<table prefix>_<hash8>_rls_policy`, where `<hash8>` is a stable hash of
    /// the full table name.
    #[must_use]
    pub fn policy_name(&self) -> String {
        let bare = self.table.rsplit('.').next().unwrap_or(&self.table);
        if bare.len() + POLICY_SUFFIX.len() <= PG_IDENT_MAX {
            return format!("{bare}{POLICY_SUFFIX}");
        }

        let hash = xxh3_64(bare.as_bytes());
        let hash8 = &format!("{hash:016x}")[..HASH_LEN];
        let max_prefix_len = PG_IDENT_MAX - POLICY_SUFFIX.len() - HASH_LEN - 1;
        // Non-ASCII names fail validation later; keep them whole here.
        let prefix = bare.get(..max_prefix_len).unwrap_or(bare);
        format!("{prefix}_{hash8}{POLICY_SUFFIX}")
    }

    /// # Errors
    /// Returns `RlsError::Config` for invalid identifiers or an empty field list.
    pub fn clause(&self) -> Result<String> {
        compile_clause(&self.namespace_prefix, &self.fields)
    }

    fn quoted_names(&self) -> Result<(String, String)> {
        let table = quote_qualified("table", &self.table)?;
        let policy = self.policy_name();
        validate_identifier("policy name", &policy)?;
        Ok((table, format!("\"{policy}\"")))
    }

    /// Drop-if-exists, create, enable and force. Safe to run repeatedly.
    ///
    /// # Errors
    /// Returns `RlsError::Config` for invalid identifiers or an empty field list.
    pub fn forward_sql(&self) -> Result<String> {
        let (table, policy) = self.quoted_names()?;
        let clause = self.clause()?;
        Ok(format!(
            "DROP POLICY IF EXISTS {policy} ON {table};\n\
             CREATE POLICY {policy} ON {table} FOR ALL\n\
             USING ({clause})\n\
             WITH CHECK ({clause});\n\
             ALTER TABLE {table} ENABLE ROW LEVEL SECURITY;\n\
             ALTER TABLE {table} FORCE ROW LEVEL SECURITY;\n"
        ))
    }

    /// Undo of [`Self::forward_sql`]: un-force, disable, drop.
    ///
    /// # Errors
    /// Returns `RlsError::Config` for invalid identifiers.
    pub fn backward_sql(&self) -> Result<String> {
        let (table, policy) = self.quoted_names()?;
        Ok(format!(
            "ALTER TABLE {table} NO FORCE ROW LEVEL SECURITY;\n\
             ALTER TABLE {table} DISABLE ROW LEVEL SECURITY;\n\
             DROP POLICY IF EXISTS {policy} ON {table};\n"
        ))
    }
}

/// Forward SQL for several tables, in the given order.
///
/// # Errors
/// Fails on the first invalid definition; nothing is returned in that case.
pub fn emit_forward(definitions: &[PolicyDefinition]) -> Result<String> {
    definitions
        .iter()
        .map(PolicyDefinition::forward_sql)
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.concat())
}

/// Backward SQL for several tables, in reverse order.
///
/// # Errors
/// Fails on the first invalid definition; nothing is returned in that case.
pub fn emit_backward(definitions: &[PolicyDefinition]) -> Result<String> {
    definitions
        .iter()
        .rev()
        .map(PolicyDefinition::backward_sql)
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.concat())
}
