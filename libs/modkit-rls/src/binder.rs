//! Session binder.
//!
//! Writes one session variable per enforced field onto a database connection
//! before the connection is handed to request code. Every enforced field is
//! written on every bind, so a pooled connection never keeps values from a
//! previous checkout.
//!
//! ```ignore
//! let binder = SessionBinder::new(fields, Arc::new(DefaultRequestResolver));
//! let mut conn = binder.acquire(&pool, &identity).await?;
//! sqlx::query("SELECT * FROM orders").fetch_all(&mut *conn).await?;
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};

use crate::config::EnforcedFieldSet;
use crate::error::{Result, RlsError};
use crate::resolver::{ContextResolver, RlsContext};
use crate::value::{DbSafeValue, RlsValue, encode, resolve_null};

/// `SET` cannot take bind parameters; `set_config` can.
const SET_SESSION_VARIABLE_SQL: &str = "SELECT set_config($1, $2, false)";

/// A connection that accepts session-scoped configuration variables.
#[async_trait]
pub trait SessionConnection: Send {
    /// Set `name` to `value` for the rest of the session.
    ///
    /// # Errors
    /// Returns a binding error if the backend rejects the assignment.
    async fn set_session_variable(&mut self, name: &str, value: &DbSafeValue) -> Result<()>;
}

#[async_trait]
impl SessionConnection for PgConnection {
    async fn set_session_variable(&mut self, name: &str, value: &DbSafeValue) -> Result<()> {
        sqlx::query(SET_SESSION_VARIABLE_SQL)
            .bind(name)
            .bind(value.to_setting_text())
            .execute(&mut *self)
            .await
            .map_err(|source| RlsError::Binding {
                variable: name.to_owned(),
                source,
            })?;
        Ok(())
    }
}

#[async_trait]
impl SessionConnection for PoolConnection<Postgres> {
    async fn set_session_variable(&mut self, name: &str, value: &DbSafeValue) -> Result<()> {
        (**self).set_session_variable(name, value).await
    }
}

/// One `<prefix>.<field> = value` write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionAssignment {
    pub field: String,
    pub variable: String,
    pub value: DbSafeValue,
}

/// What a bind wrote, in enforced-field order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindOutcome {
    pub assignments: Vec<SessionAssignment>,
    pub bypassed: bool,
}

impl BindOutcome {
    /// Value written for `field`, if it is enforced.
    #[must_use]
    pub fn value_of(&self, field: &str) -> Option<&DbSafeValue> {
        self.assignments
            .iter()
            .find(|a| a.field == field)
            .map(|a| &a.value)
    }
}

/// Resolves a request and binds the result onto a connection.
pub struct SessionBinder<R: ?Sized + Sync> {
    fields: Arc<EnforcedFieldSet>,
    resolver: Arc<dyn ContextResolver<R>>,
}

impl<R: ?Sized + Sync> Clone for SessionBinder<R> {
    fn clone(&self) -> Self {
        Self {
            fields: Arc::clone(&self.fields),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<R: ?Sized + Sync> SessionBinder<R> {
    #[must_use]
    pub fn new(fields: Arc<EnforcedFieldSet>, resolver: Arc<dyn ContextResolver<R>>) -> Self {
        Self { fields, resolver }
    }

    #[must_use]
    pub fn fields(&self) -> &EnforcedFieldSet {
        &self.fields
    }

    /// Compute the assignments for `request` without touching a connection.
    ///
    /// Bypass binds every field to `SPECIAL_CASE_ALL`. Otherwise each
    /// enforced field takes its resolved value; missing and null entries
    /// become `SPECIAL_CASE_NONE`. Context keys that are not enforced are ignored.
    ///
    /// # Errors
    /// Propagates resolver errors unchanged.
    pub async fn plan(&self, request: &R) -> Result<BindOutcome> {
        let bypassed = self.resolver.should_bypass(request).await?;
        let context = if bypassed {
            RlsContext::all(&self.fields)
        } else {
            self.resolver.resolve(request, &self.fields).await?
        };

        let ignored = context.keys().filter(|k| !self.fields.contains(k)).count();
        if ignored > 0 {
            tracing::trace!(ignored, "Ignoring non-enforced RLS context keys");
        }

        let assignments = self
            .fields
            .iter()
            .map(|field| {
                let value = resolve_null(context.get(field).cloned());
                if matches!(&value, RlsValue::Scalar(s) if s.is_reserved()) {
                    tracing::warn!(field, "RLS value spells a wildcard sentinel, binding NONE");
                }
                SessionAssignment {
                    field: field.to_owned(),
                    variable: self.fields.variable_name(field),
                    value: encode(&value),
                }
            })
            .collect();

        Ok(BindOutcome {
            assignments,
            bypassed,
        })
    }

    /// Plan and write every assignment onto `conn`, in enforced-field order.
    ///
    /// Stops at the first failed write.
    ///
    /// # Errors
    /// Resolver errors, or the first binding error.
    pub async fn bind<C>(&self, request: &R, conn: &mut C) -> Result<BindOutcome>
    where
        C: SessionConnection + ?Sized,
    {
        let outcome = self.plan(request).await?;
        write_assignments(&outcome, conn).await?;
        Ok(outcome)
    }

    /// Resolve `request`, then check out a connection from `pool` and bind it.
    ///
    /// Resolution runs first, so a rejected request never holds a connection.
    /// A connection whose bind fails is closed instead of going back to the pool.
    ///
    /// # Errors
    /// Resolver errors, `RlsError::Acquire` if no connection is available,
    /// or the first binding error.
    pub async fn acquire(&self, pool: &PgPool, request: &R) -> Result<BoundConnection> {
        let outcome = self.plan(request).await?;
        let mut conn = pool.acquire().await.map_err(RlsError::Acquire)?;
        if let Err(e) = write_assignments(&outcome, &mut conn).await {
            if let Err(close_err) = conn.close().await {
                tracing::debug!(error = %close_err, "Closing half-bound connection failed");
            }
            return Err(e);
        }
        Ok(BoundConnection { conn, outcome })
    }
}

async fn write_assignments<C>(outcome: &BindOutcome, conn: &mut C) -> Result<()>
where
    C: SessionConnection + ?Sized,
{
    for assignment in &outcome.assignments {
        tracing::trace!(
            variable = %assignment.variable,
            value = %assignment.value,
            "Setting RLS session variable"
        );
        if let Err(e) = conn
            .set_session_variable(&assignment.variable, &assignment.value)
            .await
        {
            tracing::warn!(
                variable = %assignment.variable,
                error = %e,
                "Failed to bind RLS session variable"
            );
            return Err(e);
        }
    }
    tracing::debug!(
        fields = outcome.assignments.len(),
        bypassed = outcome.bypassed,
        "RLS session bound"
    );
    Ok(())
}

/// A pooled connection whose RLS session variables are set.
pub struct BoundConnection {
    conn: PoolConnection<Postgres>,
    outcome: BindOutcome,
}

impl BoundConnection {
    #[must_use]
    pub fn outcome(&self) -> &BindOutcome {
        &self.outcome
    }

    #[must_use]
    pub fn into_inner(self) -> PoolConnection<Postgres> {
        self.conn
    }
}

impl Deref for BoundConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for BoundConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl std::fmt::Debug for BoundConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundConnection")
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}
