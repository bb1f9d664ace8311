//! RLS configuration and the process-wide enforced field set.
//!
//! Configuration is loaded once at startup and turned into an immutable
//! [`EnforcedFieldSet`] that is passed explicitly (usually as `Arc`) to the
//! resolvers, the session binder and the policy author. There is no global.

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::error::{Result, RlsError};
use crate::ident::validate_identifier;
use crate::secret::Password;

/// Default namespace for session variables (`rls.<field>`).
pub const DEFAULT_NAMESPACE_PREFIX: &str = "rls";

/// Environment variables prefixed with this override file values,
/// e.g. `RLS__SESSION_NAMESPACE_PREFIX=app`.
pub const ENV_PREFIX: &str = "RLS__";

fn default_namespace_prefix() -> String {
    DEFAULT_NAMESPACE_PREFIX.to_owned()
}

/// Raw RLS settings as they appear in configuration files.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RlsConfig {
    /// Field names eligible for enforcement (e.g. `tenant_id`, `user_id`).
    #[serde(default)]
    pub enforced_fields: Vec<String>,

    /// Application labels whose models get policies when authoring.
    #[serde(default)]
    pub tenant_apps: Vec<String>,

    /// Prefix for `current_setting('<prefix>.<field>')`.
    ///
    /// Changing it breaks existing policies until they are re-authored.
    #[serde(default = "default_namespace_prefix")]
    pub session_namespace_prefix: String,

    /// Run schema migrations as `migration_user` instead of the runtime role,
    /// so the runtime role stays subject to the policies it does not own.
    #[serde(default)]
    pub use_migration_user: bool,

    #[serde(default)]
    pub migration_user: Option<String>,

    #[serde(default)]
    pub migration_password: Option<Password>,
}

impl Default for RlsConfig {
    fn default() -> Self {
        Self {
            enforced_fields: Vec::new(),
            tenant_apps: Vec::new(),
            session_namespace_prefix: default_namespace_prefix(),
            use_migration_user: false,
            migration_user: None,
            migration_password: None,
        }
    }
}

impl RlsConfig {
    /// Layered load: defaults, then the YAML file (if given), then `RLS__*` env.
    ///
    /// # Errors
    /// Returns `RlsError::Config` if the file is missing or any layer fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.is_file() {
                return Err(RlsError::config(format!(
                    "config file does not exist: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// # Errors
    /// Returns `RlsError::Config` if extraction fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract::<Self>()
            .map_err(|e| RlsError::config(e.to_string()))
    }

    /// Check names and credential consistency.
    ///
    /// # Errors
    /// Returns a configuration error on the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        validate_identifier("session namespace prefix", &self.session_namespace_prefix)?;
        for field in &self.enforced_fields {
            validate_identifier("enforced field", field)?;
        }
        if self.use_migration_user {
            MigrationCredentials::from_config(self)?;
        }
        Ok(())
    }

    /// Validate and freeze into the shared, read-only field set.
    ///
    /// # Errors
    /// Returns a configuration error if validation fails.
    pub fn enforced_field_set(&self) -> Result<EnforcedFieldSet> {
        self.validate()?;
        EnforcedFieldSet::new(
            self.enforced_fields.clone(),
            self.tenant_apps.clone(),
            &self.session_namespace_prefix,
        )
    }
}

/// Immutable list of enforced fields plus namespace and tenant apps.
///
/// Field order is the configured order with duplicates removed; it is the
/// canonical order in which session variables are bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcedFieldSet {
    fields: Vec<String>,
    tenant_apps: Vec<String>,
    namespace_prefix: String,
}

impl EnforcedFieldSet {
    /// # Errors
    /// Returns `RlsError::Config` if a field name or the prefix is not a plain identifier.
    pub fn new(
        fields: impl IntoIterator<Item = String>,
        tenant_apps: impl IntoIterator<Item = String>,
        namespace_prefix: &str,
    ) -> Result<Self> {
        validate_identifier("session namespace prefix", namespace_prefix)?;
        let mut unique: Vec<String> = Vec::new();
        for field in fields {
            validate_identifier("enforced field", &field)?;
            if !unique.contains(&field) {
                unique.push(field);
            }
        }
        Ok(Self {
            fields: unique,
            tenant_apps: tenant_apps.into_iter().collect(),
            namespace_prefix: namespace_prefix.to_owned(),
        })
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn namespace_prefix(&self) -> &str {
        &self.namespace_prefix
    }

    #[must_use]
    pub fn is_tenant_app(&self, app_label: &str) -> bool {
        self.tenant_apps.iter().any(|a| a == app_label)
    }

    /// `<prefix>.<field>`
    #[must_use]
    pub fn variable_name(&self, field: &str) -> String {
        format!("{}.{field}", self.namespace_prefix)
    }
}

/// Credentials used only for schema migrations.
#[derive(Debug, Clone)]
pub struct MigrationCredentials {
    pub user: String,
    pub password: Password,
}

impl MigrationCredentials {
    /// Returns `Ok(None)` when the migration user is disabled.
    ///
    /// # Errors
    /// `RlsError::MissingMigrationCredentials` if enabled but user or password is absent.
    pub fn from_config(config: &RlsConfig) -> Result<Option<Self>> {
        if !config.use_migration_user {
            return Ok(None);
        }
        match (&config.migration_user, &config.migration_password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Ok(Some(Self {
                    user: user.clone(),
                    password: password.clone(),
                }))
            }
            _ => Err(RlsError::MissingMigrationCredentials),
        }
    }

    /// Switch connection options to the migration role.
    #[must_use]
    pub fn apply(&self, options: PgConnectOptions) -> PgConnectOptions {
        options
            .username(&self.user)
            .password(self.password.expose())
    }
}

/// Connection options for running policy migrations.
///
/// Swaps in the migration role when configured; otherwise returns `options` unchanged.
///
/// # Errors
/// `RlsError::MissingMigrationCredentials` if enabled but incomplete.
pub fn migration_connect_options(
    config: &RlsConfig,
    options: PgConnectOptions,
) -> Result<PgConnectOptions> {
    match MigrationCredentials::from_config(config)? {
        Some(creds) => {
            tracing::info!(user = %creds.user, "RLS migration DB user active");
            Ok(creds.apply(options))
        }
        None => Ok(options),
    }
}
