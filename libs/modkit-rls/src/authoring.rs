//! Policy authoring for an application's models.
//!
//! For each model of a tenant app, the candidate fields are the enforced
//! fields that exist as real columns. A [`FieldSelector`] confirms a subset
//! per model; models with an empty subset are skipped. Every check runs
//! before a step is produced, so a failure never yields a partial migration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::compiler::{PolicyField, SqlType};
use crate::config::EnforcedFieldSet;
use crate::error::{Result, RlsError};
use crate::migration::{PolicyDefinition, PolicyMigrationStep};

/// A model and the table backing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRef {
    pub name: String,
    pub table: String,
}

impl ModelRef {
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
        }
    }
}

/// Read-only schema access supplied by the host.
pub trait SchemaIntrospector {
    /// Models of `app_label`, in a stable order.
    fn list_models(&self, app_label: &str) -> Vec<ModelRef>;

    fn model_has_field(&self, model: &ModelRef, field: &str) -> bool;

    /// `None` when the column type cannot be determined.
    fn field_sql_type(&self, model: &ModelRef, field: &str) -> Option<SqlType>;
}

/// Confirms which candidate fields a model's policy enforces.
pub trait FieldSelector {
    /// Return a subset of `candidates`; empty skips the model.
    ///
    /// # Errors
    /// Implementation-defined, e.g. terminal IO failures.
    fn select(&mut self, model: &ModelRef, candidates: &[String]) -> Result<Vec<String>>;
}

/// Non-interactive: every candidate is enforced.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl FieldSelector for AcceptAll {
    fn select(&mut self, _model: &ModelRef, candidates: &[String]) -> Result<Vec<String>> {
        Ok(candidates.to_vec())
    }
}

/// Every model is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl FieldSelector for DenyAll {
    fn select(&mut self, _model: &ModelRef, _candidates: &[String]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Pre-decided selection by model name; unlisted models are skipped.
#[derive(Debug, Clone, Default)]
pub struct FixedSelection {
    by_model: BTreeMap<String, Vec<String>>,
}

impl FixedSelection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, model: impl Into<String>, fields: &[&str]) -> Self {
        self.by_model.insert(
            model.into(),
            fields.iter().map(|f| (*f).to_owned()).collect(),
        );
        self
    }
}

impl FieldSelector for FixedSelection {
    fn select(&mut self, model: &ModelRef, _candidates: &[String]) -> Result<Vec<String>> {
        Ok(self
            .by_model
            .get(&model.name)
            .or_else(|| {
                self.by_model
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&model.name))
                    .map(|(_, fields)| fields)
            })
            .cloned()
            .unwrap_or_default())
    }
}

/// Name of the step produced for `app_label`.
#[must_use]
pub fn step_name(app_label: &str) -> String {
    format!("add_rls_policies_to_{app_label}")
}

/// Builds one policy migration step per app.
pub struct PolicyAuthor<'a, S: SchemaIntrospector + ?Sized> {
    fields: &'a EnforcedFieldSet,
    schema: &'a S,
}

impl<'a, S: SchemaIntrospector + ?Sized> PolicyAuthor<'a, S> {
    #[must_use]
    pub fn new(fields: &'a EnforcedFieldSet, schema: &'a S) -> Self {
        Self { fields, schema }
    }

    /// Enforced fields that are real columns of `model`, in enforced order.
    #[must_use]
    pub fn candidates(&self, model: &ModelRef) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| self.schema.model_has_field(model, f))
            .map(str::to_owned)
            .collect()
    }

    /// Author the policy step for `app_label`.
    ///
    /// Returns `Ok(None)` if the app is not a tenant app or no model ends up
    /// with a policy.
    ///
    /// # Errors
    /// Selector failures, a selected field that is not a candidate, or a
    /// column whose SQL type cannot be resolved.
    pub fn author(
        &self,
        app_label: &str,
        selector: &mut dyn FieldSelector,
    ) -> Result<Option<PolicyMigrationStep>> {
        if !self.fields.is_tenant_app(app_label) {
            tracing::warn!(
                app = app_label,
                "App is not listed in tenant_apps, skipping RLS policies"
            );
            return Ok(None);
        }

        let mut definitions = Vec::new();
        for model in self.schema.list_models(app_label) {
            let candidates = self.candidates(&model);
            if candidates.is_empty() {
                tracing::debug!(model = %model.name, "No enforced fields on model");
                continue;
            }

            let selected = selector.select(&model, &candidates)?;
            if let Some(definition) = self.definition(&model, &candidates, &selected)? {
                definitions.push(definition);
            } else {
                tracing::info!(model = %model.name, "No fields selected, model skipped");
            }
        }

        if definitions.is_empty() {
            tracing::info!(app = app_label, "No RLS policies to author");
            return Ok(None);
        }

        tracing::info!(
            app = app_label,
            policies = definitions.len(),
            "Authored RLS policy migration"
        );
        PolicyMigrationStep::from_definitions(step_name(app_label), definitions).map(Some)
    }

    fn definition(
        &self,
        model: &ModelRef,
        candidates: &[String],
        selected: &[String],
    ) -> Result<Option<PolicyDefinition>> {
        for field in selected {
            if candidates.contains(field) {
                continue;
            }
            if !self.fields.contains(field) {
                return Err(RlsError::config(format!(
                    "field '{field}' is not an enforced field"
                )));
            }
            return Err(RlsError::UnknownField {
                model: model.name.clone(),
                field: field.clone(),
            });
        }

        let fields = candidates
            .iter()
            .filter(|c| selected.contains(c))
            .map(|name| {
                let sql_type = self.schema.field_sql_type(model, name).ok_or_else(|| {
                    RlsError::UnresolvableType {
                        model: model.name.clone(),
                        field: name.clone(),
                    }
                })?;
                Ok(PolicyField::new(name.clone(), sql_type))
            })
            .collect::<Result<Vec<_>>>()?;

        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(PolicyDefinition::new(
            model.table.clone(),
            fields,
            self.fields.namespace_prefix(),
        )))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticModel {
    name: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticApp {
    #[serde(default)]
    models: Vec<StaticModel>,
}

/// Schema described in a YAML or JSON document.
///
/// ```yaml
/// apps:
///   test_app:
///     models:
///       - name: TenantModel
///         table: test_app_tenantmodel   # defaults to <app>_<lowercased name>
///         fields: { id: AutoField, tenant_id: IntegerField }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticSchema {
    #[serde(default)]
    apps: BTreeMap<String, StaticApp>,
}

impl StaticSchema {
    /// Parse YAML (a superset of JSON).
    ///
    /// # Errors
    /// `RlsError::Config` on malformed input.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut schema: Self = serde_saphyr::from_str(text)
            .map_err(|e| RlsError::config(format!("invalid schema: {e}")))?;
        for (label, app) in &mut schema.apps {
            for model in &mut app.models {
                if model.table.is_none() {
                    model.table = Some(format!("{label}_{}", model.name.to_ascii_lowercase()));
                }
            }
        }
        Ok(schema)
    }

    /// # Errors
    /// IO errors, or `RlsError::Config` on malformed input.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    fn model(&self, model: &ModelRef) -> Option<&StaticModel> {
        self.apps
            .values()
            .flat_map(|app| &app.models)
            .find(|m| m.name == model.name && m.table.as_deref() == Some(model.table.as_str()))
    }
}

impl SchemaIntrospector for StaticSchema {
    fn list_models(&self, app_label: &str) -> Vec<ModelRef> {
        self.apps.get(app_label).map_or_else(Vec::new, |app| {
            app.models
                .iter()
                .filter_map(|m| Some(ModelRef::new(m.name.clone(), m.table.clone()?)))
                .collect()
        })
    }

    fn model_has_field(&self, model: &ModelRef, field: &str) -> bool {
        self.model(model)
            .is_some_and(|m| m.fields.contains_key(field))
    }

    fn field_sql_type(&self, model: &ModelRef, field: &str) -> Option<SqlType> {
        self.model(model)
            .and_then(|m| m.fields.get(field))
            .filter(|t| !t.trim().is_empty())
            .map(|t| SqlType::from_type_name(t))
    }
}
