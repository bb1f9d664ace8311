#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! `ModKit` row-level security.
//!
//! Tenant isolation enforced by PostgreSQL row-level security policies,
//! driven by per-request session variables.
//!
//! - [`config`]: enforced fields, tenant apps and namespace, loaded once at startup
//! - [`resolver`]: per-request field values and the bypass decision
//! - [`binder`]: writes one `<prefix>.<field>` session variable per enforced field
//! - [`compiler`]: the fail-closed policy expression
//! - [`migration`], [`authoring`], [`runner`]: reversible policy migrations
//!
//! # Features
//! - `axum-ext` (default): `rls_session` middleware and the `RlsConn` extractor
//! - `integration`: PostgreSQL tests using testcontainers

pub mod authoring;
pub mod binder;
pub mod compiler;
pub mod config;
pub mod error;
pub mod ident;
pub mod identity;
pub mod migration;
pub mod resolver;
pub mod runner;
pub mod secret;
pub mod value;

#[cfg(feature = "axum-ext")]
pub mod axum_ext;

pub use authoring::{
    AcceptAll, DenyAll, FieldSelector, FixedSelection, ModelRef, PolicyAuthor,
    SchemaIntrospector, StaticSchema,
};
pub use binder::{BindOutcome, BoundConnection, SessionAssignment, SessionBinder, SessionConnection};
pub use compiler::{PolicyField, SqlType, compile_clause, compile_field};
pub use config::{EnforcedFieldSet, MigrationCredentials, RlsConfig, migration_connect_options};
pub use error::{ErrorKind, Result, RlsError};
pub use identity::{RlsIdentity, RlsIdentityBuilder};
pub use migration::{
    MigrationExecutor, MigrationLedger, PolicyDefinition, PolicyMigrationStep, RunDynamicSql,
    StepState,
};
pub use resolver::{
    ContextResolver, DefaultRequestResolver, FnResolver, GraphQlContextResolver, GraphQlInfo,
    RequestLike, RlsContext,
};
pub use runner::{MigrationResult, apply_pending, revert_last};
pub use value::{
    DbSafeValue, RlsValue, SPECIAL_CASE_ALL, SPECIAL_CASE_NONE, ScalarValue, Wildcard, encode,
    resolve_null,
};

#[cfg(feature = "axum-ext")]
pub use axum_ext::{RequestParts, RlsConn, RlsLayerState, rls_session};
