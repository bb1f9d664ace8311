use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::value::ScalarValue;

/// `RlsIdentity` is the typed view of the caller that context resolvers read.
///
/// Enforced fields are looked up by exact name in `attributes`; there is no
/// reflection over arbitrary user objects and no fallback to related records.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, Deserialize)]
pub struct RlsIdentity {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    superuser: bool,
    #[serde(default, deserialize_with = "skip_null_attributes")]
    attributes: BTreeMap<String, ScalarValue>,
}

/// Claims may carry `null`; such an attribute is treated as absent.
fn skip_null_attributes<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, ScalarValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Option<ScalarValue>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(name, value)| Some((name, value?)))
        .collect())
}

impl RlsIdentity {
    #[must_use]
    pub fn builder() -> RlsIdentityBuilder {
        RlsIdentityBuilder::default()
    }

    /// Unauthenticated identity with no attributes.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Elevated marker. Only meaningful for authenticated identities.
    #[must_use]
    pub fn is_superuser(&self) -> bool {
        self.superuser
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&ScalarValue> {
        self.attributes.get(name)
    }

    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, ScalarValue> {
        &self.attributes
    }
}

#[derive(Default)]
pub struct RlsIdentityBuilder {
    authenticated: bool,
    superuser: bool,
    attributes: BTreeMap<String, ScalarValue>,
}

impl RlsIdentityBuilder {
    #[must_use]
    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    #[must_use]
    pub fn superuser(mut self) -> Self {
        self.superuser = true;
        self
    }

    #[must_use]
    pub fn attribute(mut self, name: &str, value: impl Into<ScalarValue>) -> Self {
        self.attributes.insert(name.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn build(self) -> RlsIdentity {
        RlsIdentity {
            authenticated: self.authenticated,
            superuser: self.superuser,
            attributes: self.attributes,
        }
    }
}
