//! Per-request RLS context resolution.
//!
//! A [`ContextResolver`] turns a request-like object into an [`RlsContext`]
//! and decides whether the request bypasses RLS. Resolvers are strategies:
//! the session binder accepts any implementation, including the closure-based
//! [`FnResolver`] and the GraphQL adapter [`GraphQlContextResolver`].

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::EnforcedFieldSet;
use crate::error::Result;
use crate::identity::RlsIdentity;
use crate::value::RlsValue;

/// Field values resolved for one request. Created per request, never cached.
///
/// A `None` entry is an explicit null from the resolver; the binder treats it
/// exactly like a missing entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RlsContext {
    values: BTreeMap<String, Option<RlsValue>>,
}

impl RlsContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every field of `fields` mapped to `Wildcard::All`.
    #[must_use]
    pub fn all(fields: &EnforcedFieldSet) -> Self {
        fields.iter().map(|f| (f, RlsValue::ALL)).collect()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<RlsValue>) {
        self.values.insert(field.into(), Some(value.into()));
    }

    pub fn insert_null(&mut self, field: impl Into<String>) {
        self.values.insert(field.into(), None);
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<RlsValue>) -> Self {
        self.insert(field, value);
        self
    }

    #[must_use]
    pub fn with_null(mut self, field: impl Into<String>) -> Self {
        self.insert_null(field);
        self
    }

    /// The value for `field`, or `None` if missing or null.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&RlsValue> {
        self.values.get(field).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<K: Into<String>> FromIterator<(K, RlsValue)> for RlsContext {
    fn from_iter<T: IntoIterator<Item = (K, RlsValue)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v)))
                .collect(),
        }
    }
}

/// Anything that can hand out the caller's identity.
pub trait RequestLike {
    fn identity(&self) -> Option<&RlsIdentity>;
}

impl RequestLike for RlsIdentity {
    fn identity(&self) -> Option<&RlsIdentity> {
        Some(self)
    }
}

impl RequestLike for Option<RlsIdentity> {
    fn identity(&self) -> Option<&RlsIdentity> {
        self.as_ref()
    }
}

/// GraphQL resolver-info objects carry the identity on their context.
pub trait GraphQlInfo {
    fn context_identity(&self) -> Option<&RlsIdentity>;
}

/// Resolves RLS values and the bypass decision for a request of type `R`.
#[async_trait]
pub trait ContextResolver<R: ?Sized + Sync>: Send + Sync {
    /// Resolve field values for the enforced fields.
    ///
    /// # Errors
    /// Any error fails the request; it is never turned into an allow.
    async fn resolve(&self, request: &R, fields: &EnforcedFieldSet) -> Result<RlsContext>;

    /// `true` binds every enforced field to `Wildcard::All`.
    ///
    /// # Errors
    /// Any error fails the request.
    async fn should_bypass(&self, request: &R) -> Result<bool>;
}

/// Exact-name lookup of each enforced field on an authenticated identity.
fn context_from_identity(identity: Option<&RlsIdentity>, fields: &EnforcedFieldSet) -> RlsContext {
    let Some(identity) = identity.filter(|i| i.is_authenticated()) else {
        return RlsContext::new();
    };
    fields
        .iter()
        .map(|field| {
            let value = identity
                .attribute(field)
                .cloned()
                .map_or(RlsValue::NONE, RlsValue::Scalar);
            (field, value)
        })
        .collect()
}

fn identity_is_superuser(identity: Option<&RlsIdentity>) -> bool {
    identity.is_some_and(|i| i.is_authenticated() && i.is_superuser())
}

/// Default resolver for HTTP-style requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRequestResolver;

#[async_trait]
impl<R> ContextResolver<R> for DefaultRequestResolver
where
    R: RequestLike + ?Sized + Sync,
{
    async fn resolve(&self, request: &R, fields: &EnforcedFieldSet) -> Result<RlsContext> {
        Ok(context_from_identity(request.identity(), fields))
    }

    async fn should_bypass(&self, request: &R) -> Result<bool> {
        Ok(identity_is_superuser(request.identity()))
    }
}

/// Same semantics as [`DefaultRequestResolver`], reading `info.context`'s identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphQlContextResolver;

#[async_trait]
impl<I> ContextResolver<I> for GraphQlContextResolver
where
    I: GraphQlInfo + ?Sized + Sync,
{
    async fn resolve(&self, info: &I, fields: &EnforcedFieldSet) -> Result<RlsContext> {
        Ok(context_from_identity(info.context_identity(), fields))
    }

    async fn should_bypass(&self, info: &I) -> Result<bool> {
        Ok(identity_is_superuser(info.context_identity()))
    }
}

/// Resolver assembled from two plain functions.
pub struct FnResolver<F, B> {
    resolve: F,
    bypass: B,
}

impl<F, B> FnResolver<F, B> {
    #[must_use]
    pub fn new<R>(resolve: F, bypass: B) -> Self
    where
        R: ?Sized,
        F: Fn(&R, &EnforcedFieldSet) -> Result<RlsContext>,
        B: Fn(&R) -> Result<bool>,
    {
        Self { resolve, bypass }
    }
}

#[async_trait]
impl<R, F, B> ContextResolver<R> for FnResolver<F, B>
where
    R: ?Sized + Sync,
    F: Fn(&R, &EnforcedFieldSet) -> Result<RlsContext> + Send + Sync,
    B: Fn(&R) -> Result<bool> + Send + Sync,
{
    async fn resolve(&self, request: &R, fields: &EnforcedFieldSet) -> Result<RlsContext> {
        (self.resolve)(request, fields)
    }

    async fn should_bypass(&self, request: &R) -> Result<bool> {
        (self.bypass)(request)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::RlsError;
    use crate::value::ScalarValue;

    fn fields() -> EnforcedFieldSet {
        EnforcedFieldSet::new(
            ["tenant_id".to_owned(), "user_id".to_owned()],
            Vec::<String>::new(),
            "rls",
        )
        .unwrap()
    }

    struct Info {
        user: Option<RlsIdentity>,
    }

    impl GraphQlInfo for Info {
        fn context_identity(&self) -> Option<&RlsIdentity> {
            self.user.as_ref()
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_user_resolves_empty() {
        let request = Some(RlsIdentity::anonymous());
        let ctx = DefaultRequestResolver
            .resolve(&request, &fields())
            .await
            .unwrap();
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn test_missing_identity_resolves_empty() {
        let request: Option<RlsIdentity> = None;
        let ctx = DefaultRequestResolver
            .resolve(&request, &fields())
            .await
            .unwrap();
        assert!(ctx.is_empty());
        assert!(!DefaultRequestResolver.should_bypass(&request).await.unwrap());
    }

    #[tokio::test]
    async fn test_authenticated_user_with_fields() {
        let request = RlsIdentity::builder()
            .authenticated()
            .attribute("tenant_id", 123)
            .attribute("user_id", 456)
            .build();

        let ctx = DefaultRequestResolver
            .resolve(&request, &fields())
            .await
            .unwrap();

        assert_eq!(ctx.get("tenant_id"), Some(&RlsValue::from(123)));
        assert_eq!(ctx.get("user_id"), Some(&RlsValue::from(456)));
    }

    #[tokio::test]
    async fn test_missing_attribute_becomes_none_not_all() {
        let request = RlsIdentity::builder()
            .authenticated()
            .attribute("tenant_id", 123)
            .attribute("tenant", 9)
            .build();

        let ctx = DefaultRequestResolver
            .resolve(&request, &fields())
            .await
            .unwrap();

        assert_eq!(ctx.get("user_id"), Some(&RlsValue::NONE));
        assert_eq!(ctx.len(), 2);
    }

    #[tokio::test]
    async fn test_bypass_only_for_authenticated_superuser() {
        let admin = RlsIdentity::builder().authenticated().superuser().build();
        let user = RlsIdentity::builder().authenticated().build();
        let forged = RlsIdentity::builder().superuser().build();

        assert!(DefaultRequestResolver.should_bypass(&admin).await.unwrap());
        assert!(!DefaultRequestResolver.should_bypass(&user).await.unwrap());
        assert!(!DefaultRequestResolver.should_bypass(&forged).await.unwrap());
    }

    #[tokio::test]
    async fn test_graphql_resolver_reads_context_identity() {
        let info = Info {
            user: Some(
                RlsIdentity::builder()
                    .authenticated()
                    .superuser()
                    .attribute("tenant_id", "acme")
                    .build(),
            ),
        };

        let ctx = GraphQlContextResolver.resolve(&info, &fields()).await.unwrap();
        assert_eq!(
            ctx.get("tenant_id"),
            Some(&RlsValue::Scalar(ScalarValue::Text("acme".to_owned())))
        );
        assert!(GraphQlContextResolver.should_bypass(&info).await.unwrap());

        let anonymous = Info { user: None };
        assert!(
            GraphQlContextResolver
                .resolve(&anonymous, &fields())
                .await
                .unwrap()
                .is_empty()
        );
        assert!(!GraphQlContextResolver.should_bypass(&anonymous).await.unwrap());
    }

    #[tokio::test]
    async fn test_fn_resolver_propagates_errors() {
        let resolver = FnResolver::new(
            |_: &str, _: &EnforcedFieldSet| Err(RlsError::Resolution("lookup failed".to_owned())),
            |_: &str| Ok(false),
        );

        let result = resolver.resolve("req", &fields()).await;
        assert!(matches!(result, Err(RlsError::Resolution(_))));
    }

    #[test]
    fn test_context_all() {
        let ctx = RlsContext::all(&fields());
        assert_eq!(ctx.get("tenant_id"), Some(&RlsValue::ALL));
        assert_eq!(ctx.get("user_id"), Some(&RlsValue::ALL));
    }

    #[test]
    fn test_context_null_entry() {
        let ctx = RlsContext::new().with_null("tenant_id");
        assert!(ctx.contains("tenant_id"));
        assert!(ctx.get("tenant_id").is_none());
    }
}
