use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use modkit_rls::{MigrationLedger, MigrationResult, RlsConfig, migration_connect_options};
use sea_orm::{DatabaseConnection, SqlxPostgresConnector};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::author::load_ledger;

#[derive(Args)]
pub struct SqlArgs {
    /// Migration ledger file
    #[arg(long, default_value = "rls_migrations.json")]
    ledger: PathBuf,

    /// Step name, e.g. `add_rls_policies_to_shop`
    step: String,

    /// Print the backward (revert) SQL instead
    #[arg(long)]
    backward: bool,
}

impl SqlArgs {
    pub fn run(&self) -> Result<()> {
        let ledger = load_ledger(&self.ledger)?;
        print!("{}", self.render(&ledger)?);
        Ok(())
    }

    fn render<'a>(&self, ledger: &'a MigrationLedger) -> Result<&'a str> {
        let step = ledger.get(&self.step).ok_or_else(|| {
            anyhow!(
                "step '{}' not found in {}",
                self.step,
                self.ledger.display()
            )
        })?;
        Ok(if self.backward {
            &step.backward_sql
        } else {
            &step.forward_sql
        })
    }
}

#[derive(Args)]
pub struct DbArgs {
    /// Migration ledger file
    #[arg(long, default_value = "rls_migrations.json")]
    ledger: PathBuf,

    /// PostgreSQL connection URL; the migration role replaces its credentials when enabled
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,
}

impl DbArgs {
    pub async fn apply(&self, config: &RlsConfig) -> Result<()> {
        let mut ledger = load_ledger(&self.ledger)?;
        let conn = self.connect(config).await?;

        let result = modkit_rls::apply_pending(&conn, &mut ledger)
            .await
            .context("failed to apply RLS migrations")?;
        self.save(&ledger)?;

        report("Applied", &result);
        if result.skipped > 0 {
            println!("{} step(s) already applied", result.skipped);
        }
        Ok(())
    }

    pub async fn revert(&self, config: &RlsConfig) -> Result<()> {
        let mut ledger = load_ledger(&self.ledger)?;
        let conn = self.connect(config).await?;

        let result = modkit_rls::revert_last(&conn, &mut ledger)
            .await
            .context("failed to revert RLS migration")?;
        self.save(&ledger)?;

        report("Reverted", &result);
        Ok(())
    }

    async fn connect(&self, config: &RlsConfig) -> Result<DatabaseConnection> {
        let options = PgConnectOptions::from_str(&self.database_url)
            .context("invalid database URL")?;
        let options = migration_connect_options(config, options)?;
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to connect to PostgreSQL")?;
        Ok(SqlxPostgresConnector::from_sqlx_postgres_pool(pool))
    }

    fn save(&self, ledger: &MigrationLedger) -> Result<()> {
        ledger
            .save(&self.ledger)
            .with_context(|| format!("failed to write ledger {}", self.ledger.display()))
    }
}

fn report(action: &str, result: &MigrationResult) {
    if result.applied_names.is_empty() {
        println!("Nothing to do");
        return;
    }
    for name in &result.applied_names {
        println!("{action} {name}");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use modkit_rls::{PolicyDefinition, PolicyField, PolicyMigrationStep, SqlType};

    use super::*;

    fn ledger() -> MigrationLedger {
        let mut ledger = MigrationLedger::new();
        ledger
            .push(
                PolicyMigrationStep::from_definitions(
                    "add_rls_policies_to_shop",
                    vec![PolicyDefinition::new(
                        "shop_order",
                        vec![PolicyField::new("tenant_id", SqlType::Int)],
                        "rls",
                    )],
                )
                .unwrap(),
            )
            .unwrap();
        ledger
    }

    fn args(backward: bool) -> SqlArgs {
        SqlArgs {
            ledger: PathBuf::from("rls_migrations.json"),
            step: "add_rls_policies_to_shop".to_owned(),
            backward,
        }
    }

    #[test]
    fn renders_forward_or_backward() {
        let ledger = ledger();
        let forward = args(false).render(&ledger).unwrap();
        let backward = args(true).render(&ledger).unwrap();
        assert!(forward.contains("CREATE POLICY \"shop_order_rls_policy\""));
        assert!(backward.starts_with("ALTER TABLE \"shop_order\" NO FORCE"));
    }

    #[test]
    fn unknown_step_is_an_error() {
        let mut args = args(false);
        args.step = "missing".to_owned();
        let err = args.render(&ledger()).unwrap_err();
        assert!(err.to_string().contains("'missing' not found"));
    }
}
