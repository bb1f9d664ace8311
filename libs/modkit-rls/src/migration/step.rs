use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction};
use serde::{Deserialize, Serialize};

use super::emitter::{PolicyDefinition, emit_backward, emit_forward};
use crate::error::{Result, RlsError};

/// Lifecycle of a policy migration step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    #[default]
    Pending,
    Applied,
    Reverted,
}

impl StepState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Applied => "applied",
            StepState::Reverted => "reverted",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs a batch of SQL statements as one unit.
#[async_trait]
pub trait MigrationExecutor: Send {
    /// # Errors
    /// Any backend failure.
    async fn execute_batch(&mut self, sql: &str) -> Result<()>;
}

#[async_trait]
impl MigrationExecutor for DatabaseConnection {
    async fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.execute_unprepared(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl MigrationExecutor for DatabaseTransaction {
    async fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.execute_unprepared(sql).await?;
        Ok(())
    }
}

/// A reversible migration: forward and backward SQL for one or more tables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMigrationStep {
    pub name: String,
    pub forward_sql: String,
    pub backward_sql: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub definitions: Vec<PolicyDefinition>,
    #[serde(default)]
    pub state: StepState,
}

impl PolicyMigrationStep {
    /// Emit SQL for `definitions` and wrap it in a pending step.
    ///
    /// # Errors
    /// Returns `RlsError::Config` if `definitions` is empty or any is invalid.
    pub fn from_definitions(
        name: impl Into<String>,
        definitions: Vec<PolicyDefinition>,
    ) -> Result<Self> {
        let name = name.into();
        if definitions.is_empty() {
            return Err(RlsError::config(format!(
                "migration step '{name}' has no policies"
            )));
        }
        Ok(Self {
            forward_sql: emit_forward(&definitions)?,
            backward_sql: emit_backward(&definitions)?,
            name,
            dependencies: Vec::new(),
            definitions,
            state: StepState::Pending,
        })
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    fn check_apply(&self) -> Result<()> {
        match self.state {
            StepState::Pending | StepState::Reverted => Ok(()),
            StepState::Applied => Err(self.invalid("apply")),
        }
    }

    fn check_revert(&self) -> Result<()> {
        match self.state {
            StepState::Applied => Ok(()),
            StepState::Pending | StepState::Reverted => Err(self.invalid("revert")),
        }
    }

    fn invalid(&self, action: &'static str) -> RlsError {
        RlsError::InvalidTransition {
            step: self.name.clone(),
            from: self.state.as_str(),
            action,
        }
    }

    /// `pending | reverted -> applied`.
    ///
    /// # Errors
    /// `RlsError::InvalidTransition` if already applied.
    pub fn apply(&mut self) -> Result<()> {
        self.check_apply()?;
        self.state = StepState::Applied;
        Ok(())
    }

    /// `applied -> reverted`.
    ///
    /// # Errors
    /// `RlsError::InvalidTransition` unless applied.
    pub fn revert(&mut self) -> Result<()> {
        self.check_revert()?;
        self.state = StepState::Reverted;
        Ok(())
    }

    /// Run the forward SQL on `executor`, then move to `applied`.
    ///
    /// State is unchanged if the SQL fails.
    ///
    /// # Errors
    /// Illegal transition or executor failure.
    pub async fn apply_with<E>(&mut self, executor: &mut E) -> Result<()>
    where
        E: MigrationExecutor + ?Sized,
    {
        self.check_apply()?;
        executor.execute_batch(&self.forward_sql).await?;
        self.apply()
    }

    /// Run the backward SQL on `executor`, then move to `reverted`.
    ///
    /// # Errors
    /// Illegal transition or executor failure.
    pub async fn revert_with<E>(&mut self, executor: &mut E) -> Result<()>
    where
        E: MigrationExecutor + ?Sized,
    {
        self.check_revert()?;
        executor.execute_batch(&self.backward_sql).await?;
        self.revert()
    }

    /// Reconcile with the migration history table.
    pub(crate) fn sync_recorded(&mut self, recorded: bool) {
        self.state = match (recorded, self.state) {
            (true, _) => StepState::Applied,
            (false, StepState::Applied) => StepState::Pending,
            (false, other) => other,
        };
    }
}

/// Ordered, named migration steps, persisted as JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationLedger {
    steps: Vec<PolicyMigrationStep>,
}

impl MigrationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `RlsError::DuplicateStep` if a step with the same name exists.
    pub fn push(&mut self, step: PolicyMigrationStep) -> Result<()> {
        if self.get(&step.name).is_some() {
            return Err(RlsError::DuplicateStep(step.name));
        }
        self.steps.push(step);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PolicyMigrationStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn steps(&self) -> &[PolicyMigrationStep] {
        &self.steps
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [PolicyMigrationStep] {
        &mut self.steps
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// # Errors
    /// JSON errors, or `RlsError::DuplicateStep`.
    pub fn from_json(json: &str) -> Result<Self> {
        let ledger: Self = serde_json::from_str(json)?;
        ledger.check_unique()?;
        Ok(ledger)
    }

    /// # Errors
    /// JSON serialization errors.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a ledger file; a missing file is an empty ledger.
    ///
    /// # Errors
    /// IO or JSON errors.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the ledger next to `path` and rename it into place, so a crash
    /// never leaves a truncated file behind.
    ///
    /// # Errors
    /// IO or JSON errors.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub(crate) fn check_unique(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(RlsError::DuplicateStep(step.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::compiler::{PolicyField, SqlType};

    #[derive(Default)]
    struct RecordingExecutor {
        batches: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl MigrationExecutor for RecordingExecutor {
        async fn execute_batch(&mut self, sql: &str) -> Result<()> {
            if self.fail {
                return Err(RlsError::Migration(sea_orm::DbErr::Custom(
                    "permission denied".to_owned(),
                )));
            }
            self.batches.push(sql.to_owned());
            Ok(())
        }
    }

    fn step() -> PolicyMigrationStep {
        PolicyMigrationStep::from_definitions(
            "add_rls_policies_to_test_app",
            vec![PolicyDefinition::new(
                "test_app_order",
                vec![PolicyField::new("tenant_id", SqlType::Int)],
                "rls",
            )],
        )
        .unwrap()
    }

    #[test]
    fn transitions() {
        let mut s = step();
        assert_eq!(s.state, StepState::Pending);
        assert!(s.revert().is_err());

        s.apply().unwrap();
        assert_eq!(s.state, StepState::Applied);
        assert!(matches!(
            s.apply(),
            Err(RlsError::InvalidTransition { from: "applied", action: "apply", .. })
        ));

        s.revert().unwrap();
        assert_eq!(s.state, StepState::Reverted);
        assert!(s.revert().is_err());

        s.apply().unwrap();
        assert_eq!(s.state, StepState::Applied);
    }

    #[tokio::test]
    async fn apply_with_runs_forward_then_backward() {
        let mut s = step();
        let mut exec = RecordingExecutor::default();

        s.apply_with(&mut exec).await.unwrap();
        s.revert_with(&mut exec).await.unwrap();

        assert_eq!(exec.batches, vec![s.forward_sql.clone(), s.backward_sql.clone()]);
        assert_eq!(s.state, StepState::Reverted);
    }

    #[tokio::test]
    async fn failed_sql_leaves_state() {
        let mut s = step();
        let mut exec = RecordingExecutor {
            fail: true,
            ..RecordingExecutor::default()
        };

        assert!(s.apply_with(&mut exec).await.is_err());
        assert_eq!(s.state, StepState::Pending);
    }

    #[tokio::test]
    async fn illegal_transition_runs_no_sql() {
        let mut s = step();
        let mut exec = RecordingExecutor::default();

        assert!(s.revert_with(&mut exec).await.is_err());
        assert!(exec.batches.is_empty());
    }

    #[test]
    fn empty_step_rejected() {
        assert!(PolicyMigrationStep::from_definitions("empty", vec![]).is_err());
    }

    #[test]
    fn sync_recorded_reconciles_state() {
        let mut s = step();
        s.sync_recorded(true);
        assert_eq!(s.state, StepState::Applied);
        s.sync_recorded(false);
        assert_eq!(s.state, StepState::Pending);

        s.state = StepState::Reverted;
        s.sync_recorded(false);
        assert_eq!(s.state, StepState::Reverted);
    }

    #[test]
    fn ledger_rejects_duplicates() {
        let mut ledger = MigrationLedger::new();
        ledger.push(step()).unwrap();
        assert!(matches!(ledger.push(step()), Err(RlsError::DuplicateStep(_))));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn ledger_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rls_migrations.json");

        assert!(MigrationLedger::load(&path).unwrap().is_empty());

        let mut ledger = MigrationLedger::new();
        ledger.push(step().with_dependencies(vec!["0001_initial".to_owned()])).unwrap();
        ledger.save(&path).unwrap();

        let loaded = MigrationLedger::load(&path).unwrap();
        assert_eq!(loaded, ledger);
        assert_eq!(loaded.steps()[0].dependencies, vec!["0001_initial"]);
    }

    #[test]
    fn save_replaces_existing_ledger_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rls_migrations.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut ledger = MigrationLedger::new();
        ledger.push(step()).unwrap();
        ledger.save(&path).unwrap();

        assert_eq!(MigrationLedger::load(&path).unwrap(), ledger);
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("rls_migrations.json")]);
    }

    #[test]
    fn ledger_json_with_duplicate_names_rejected() {
        let s = serde_json::to_value(step()).unwrap();
        let json = serde_json::json!({ "steps": [s.clone(), s] }).to_string();
        assert!(matches!(
            MigrationLedger::from_json(&json),
            Err(RlsError::DuplicateStep(_))
        ));
    }
}
