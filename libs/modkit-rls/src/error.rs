use thiserror::Error;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, RlsError>;

/// Coarse error class, used for logging and HTTP mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Startup or authoring time. Fatal.
    Configuration,
    /// Per-request context resolution failed.
    Resolution,
    /// Session variables could not be written to the connection.
    Binding,
    /// Policy migration failed to apply or revert.
    Migration,
}

#[derive(Debug, Error)]
pub enum RlsError {
    #[error("Invalid RLS configuration: {0}")]
    Config(String),

    #[error("Model '{model}' has no field '{field}'")]
    UnknownField { model: String, field: String },

    #[error("Cannot determine SQL type of '{model}.{field}'")]
    UnresolvableType { model: String, field: String },

    #[error("MIGRATION_USER and MIGRATION_PASSWORD must be set when use_migration_user is enabled")]
    MissingMigrationCredentials,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("RLS context resolution failed: {0}")]
    Resolution(String),

    #[error("Failed to set session variable '{variable}': {source}")]
    Binding {
        variable: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to acquire database connection: {0}")]
    Acquire(#[source] sqlx::Error),

    #[error("Failed to set session variable '{variable}': {message}")]
    BindingBackend { variable: String, message: String },

    #[error("Cannot {action} migration step '{step}' in state {from}")]
    InvalidTransition {
        step: String,
        from: &'static str,
        action: &'static str,
    },

    #[error("Duplicate migration step name '{0}'")]
    DuplicateStep(String),

    #[error(transparent)]
    Migration(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RlsError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            RlsError::Config(_)
            | RlsError::UnknownField { .. }
            | RlsError::UnresolvableType { .. }
            | RlsError::MissingMigrationCredentials
            | RlsError::Serde(_)
            | RlsError::Io(_) => ErrorKind::Configuration,
            RlsError::Unauthorized(_) | RlsError::Resolution(_) => ErrorKind::Resolution,
            RlsError::Binding { .. } | RlsError::BindingBackend { .. } | RlsError::Acquire(_) => {
                ErrorKind::Binding
            }
            RlsError::InvalidTransition { .. }
            | RlsError::DuplicateStep(_)
            | RlsError::Migration(_) => ErrorKind::Migration,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        RlsError::Config(msg.into())
    }
}

#[cfg(feature = "axum-ext")]
impl axum::response::IntoResponse for RlsError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::response::Json;
        use serde_json::json;

        let status = match self {
            RlsError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Binding and migration details stay in the logs.
        let message = match self.kind() {
            ErrorKind::Resolution => self.to_string(),
            _ => "Internal error: request security context unavailable".to_owned(),
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
