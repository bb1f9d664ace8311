use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use modkit_rls::{
    AcceptAll, FixedSelection, MigrationLedger, PolicyAuthor, RlsConfig, SchemaIntrospector,
    StaticSchema,
};

use crate::selector::PromptSelector;

#[derive(Args)]
pub struct AddPoliciesArgs {
    /// Application label; must be listed in `tenant_apps`
    app_label: String,

    /// YAML description of the app's models and column types
    #[arg(long)]
    schema: PathBuf,

    /// Migration ledger file to append to
    #[arg(long, default_value = "rls_migrations.json")]
    ledger: PathBuf,

    /// Only author a policy for this model
    #[arg(long, requires = "fields")]
    model: Option<String>,

    /// Fields to enforce on `--model`
    #[arg(long, value_delimiter = ',', requires = "model")]
    fields: Vec<String>,

    /// Enforce every candidate field without prompting
    #[arg(long, conflicts_with = "model")]
    no_input: bool,

    /// Migration this step depends on (repeatable)
    #[arg(long = "dependency")]
    dependencies: Vec<String>,
}

impl AddPoliciesArgs {
    pub fn run(&self, config: &RlsConfig) -> Result<()> {
        let fields = config.enforced_field_set()?;
        let schema = StaticSchema::load(&self.schema)
            .with_context(|| format!("failed to read schema {}", self.schema.display()))?;
        let mut ledger = load_ledger(&self.ledger)?;

        let author = PolicyAuthor::new(&fields, &schema);
        let step = match &self.model {
            Some(model) => {
                let known = schema
                    .list_models(&self.app_label)
                    .iter()
                    .any(|m| m.name.eq_ignore_ascii_case(model));
                if !known {
                    bail!("app '{}' has no model '{model}'", self.app_label);
                }
                let fields: Vec<&str> = self.fields.iter().map(String::as_str).collect();
                let mut selector = FixedSelection::new().with(model.clone(), &fields);
                author.author(&self.app_label, &mut selector)?
            }
            None if self.no_input => author.author(&self.app_label, &mut AcceptAll)?,
            None => {
                let mut selector = PromptSelector::new(std::io::stdin().lock(), std::io::stdout());
                author.author(&self.app_label, &mut selector)?
            }
        };

        let Some(step) = step else {
            println!("No RLS policies authored for '{}'", self.app_label);
            return Ok(());
        };
        let step = step.with_dependencies(self.dependencies.clone());

        if ledger.get(&step.name).is_some() {
            bail!(
                "step '{}' already exists in {}",
                step.name,
                self.ledger.display()
            );
        }
        let name = step.name.clone();
        let policies = step.definitions.len();
        ledger.push(step)?;
        ledger
            .save(&self.ledger)
            .with_context(|| format!("failed to write ledger {}", self.ledger.display()))?;

        println!(
            "Added step '{name}' with {policies} polic{} to {}",
            if policies == 1 { "y" } else { "ies" },
            self.ledger.display()
        );
        Ok(())
    }
}

pub fn load_ledger(path: &Path) -> Result<MigrationLedger> {
    MigrationLedger::load(path)
        .with_context(|| format!("failed to read ledger {}", path.display()))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const SCHEMA: &str = r"
apps:
  shop:
    models:
      - name: Order
        fields: { id: AutoField, tenant_id: IntegerField, user_id: IntegerField }
      - name: Product
        fields: { id: AutoField, tenant_id: IntegerField }
";

    fn config() -> RlsConfig {
        RlsConfig {
            enforced_fields: vec!["tenant_id".to_owned(), "user_id".to_owned()],
            tenant_apps: vec!["shop".to_owned()],
            ..RlsConfig::default()
        }
    }

    fn args(dir: &Path) -> AddPoliciesArgs {
        let schema = dir.join("schema.yaml");
        std::fs::write(&schema, SCHEMA).unwrap();
        AddPoliciesArgs {
            app_label: "shop".to_owned(),
            schema,
            ledger: dir.join("rls_migrations.json"),
            model: None,
            fields: Vec::new(),
            no_input: true,
            dependencies: vec!["0001_initial".to_owned()],
        }
    }

    #[test]
    fn no_input_appends_step_for_every_model() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());

        args.run(&config()).unwrap();

        let ledger = load_ledger(&args.ledger).unwrap();
        let step = ledger.get("add_rls_policies_to_shop").unwrap();
        assert_eq!(step.definitions.len(), 2);
        assert_eq!(step.dependencies, vec!["0001_initial"]);
        assert!(step.forward_sql.contains("\"shop_order\""));
    }

    #[test]
    fn single_model_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path());
        args.no_input = false;
        args.model = Some("Order".to_owned());
        args.fields = vec!["tenant_id".to_owned()];

        args.run(&config()).unwrap();

        let ledger = load_ledger(&args.ledger).unwrap();
        let step = &ledger.steps()[0];
        assert_eq!(step.definitions.len(), 1);
        assert_eq!(step.definitions[0].table, "shop_order");
        assert!(!step.forward_sql.contains("user_id"));
    }

    #[test]
    fn unknown_model_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path());
        args.no_input = false;
        args.model = Some("Invoice".to_owned());
        args.fields = vec!["tenant_id".to_owned()];

        let err = args.run(&config()).unwrap_err();

        assert!(err.to_string().contains("no model 'Invoice'"));
        assert!(!args.ledger.exists());
    }

    #[test]
    fn second_run_for_same_app_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());

        args.run(&config()).unwrap();
        assert!(args.run(&config()).is_err());
        assert_eq!(load_ledger(&args.ledger).unwrap().len(), 1);
    }

    #[test]
    fn non_tenant_app_leaves_ledger_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());
        let config = RlsConfig {
            tenant_apps: Vec::new(),
            ..config()
        };

        args.run(&config).unwrap();
        assert!(!args.ledger.exists());
    }
}
