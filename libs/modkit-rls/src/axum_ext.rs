//! Axum middleware and extractor for RLS-bound connections.
//!
//! The auth layer puts an [`RlsIdentity`] into request extensions. The
//! [`rls_session`] middleware resolves it, checks out a pooled connection,
//! binds the session variables and exposes the connection to handlers as
//! [`RlsConn`]. Requests that fail resolution or binding never reach the handler.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{Extensions, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};

use crate::binder::{BoundConnection, SessionBinder};
use crate::error::RlsError;
use crate::identity::RlsIdentity;
use crate::resolver::RequestLike;

/// What the resolver sees of an HTTP request.
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    identity: Option<RlsIdentity>,
}

impl RequestParts {
    #[must_use]
    pub fn from_extensions(extensions: &Extensions) -> Self {
        Self {
            identity: extensions.get::<RlsIdentity>().cloned(),
        }
    }
}

impl RequestLike for RequestParts {
    fn identity(&self) -> Option<&RlsIdentity> {
        self.identity.as_ref()
    }
}

#[derive(Clone)]
pub struct RlsLayerState {
    pool: PgPool,
    binder: Arc<SessionBinder<RequestParts>>,
}

impl RlsLayerState {
    #[must_use]
    pub fn new(pool: PgPool, binder: Arc<SessionBinder<RequestParts>>) -> Self {
        Self { pool, binder }
    }
}

/// Bind a fresh connection for every request.
///
/// Returns `RlsError`'s response (401 for `Unauthorized`, 500 otherwise) when
/// resolution or binding fails.
pub async fn rls_session(
    State(RlsLayerState { pool, binder }): State<RlsLayerState>,
    mut request: Request,
    next: Next,
) -> Response {
    let parts = RequestParts::from_extensions(request.extensions());

    match binder.acquire(&pool, &parts).await {
        Ok(conn) => {
            request.extensions_mut().insert(RlsConn::new(conn));
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(
                error = %err,
                kind = ?err.kind(),
                path = %request.uri().path(),
                "Rejecting request: RLS session not bound"
            );
            err.into_response()
        }
    }
}

/// Handle to the request's bound connection.
///
/// ```ignore
/// async fn list(conn: RlsConn) -> Result<Json<Vec<Order>>, RlsError> {
///     let mut conn = conn.lock().await;
///     let rows = sqlx::query_as("SELECT * FROM orders").fetch_all(&mut **conn).await?;
///     ...
/// }
/// ```
#[derive(Clone)]
pub struct RlsConn(Arc<Mutex<BoundConnection>>);

impl RlsConn {
    fn new(conn: BoundConnection) -> Self {
        Self(Arc::new(Mutex::new(conn)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, BoundConnection> {
        self.0.lock().await
    }
}

impl std::fmt::Debug for RlsConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RlsConn").finish_non_exhaustive()
    }
}

impl<S> FromRequestParts<S> for RlsConn
where
    S: Send + Sync,
{
    type Rejection = RlsError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RlsConn>().cloned().ok_or_else(|| {
            RlsError::config("RlsConn not found - rls_session middleware not configured")
        })
    }
}
