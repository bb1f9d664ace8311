//! Applies and reverts policy migration steps against PostgreSQL.
//!
//! Applied step names are recorded in the `modkit_rls_migrations` history
//! table. Each step runs in its own transaction together with its history
//! update, so a step is either fully applied and recorded or not at all.

use std::collections::HashSet;

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DbErr, FromQueryResult, Statement, TransactionTrait,
};
use sea_orm_migration::{MigrationTrait, SchemaManager};
use tracing::{debug, info};

use crate::error::{Result, RlsError};
use crate::migration::{MigrationLedger, RunDynamicSql};

pub const HISTORY_TABLE: &str = "modkit_rls_migrations";

/// Result of a runner invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationResult {
    /// Number of steps applied (or reverted).
    pub applied: usize,
    /// Number of steps skipped because they were already in the desired state.
    pub skipped: usize,
    pub applied_names: Vec<String>,
}

#[derive(Debug, FromQueryResult)]
struct HistoryRecord {
    version: String,
}

fn require_postgres(conn: &impl ConnectionTrait) -> Result<DatabaseBackend> {
    match conn.get_database_backend() {
        DatabaseBackend::Postgres => Ok(DatabaseBackend::Postgres),
        DatabaseBackend::MySql | DatabaseBackend::Sqlite => Err(RlsError::Migration(
            DbErr::Custom("row level security policies require PostgreSQL".to_owned()),
        )),
    }
}

async fn ensure_history_table(conn: &impl ConnectionTrait) -> Result<()> {
    let backend = require_postgres(conn)?;
    conn.execute(Statement::from_string(
        backend,
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{HISTORY_TABLE}" (
                version VARCHAR(255) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        ),
    ))
    .await?;
    Ok(())
}

/// Names of recorded (applied) steps.
///
/// # Errors
/// Backend errors, or a non-PostgreSQL connection.
pub async fn applied_steps(conn: &impl ConnectionTrait) -> Result<HashSet<String>> {
    ensure_history_table(conn).await?;
    let records = HistoryRecord::find_by_statement(Statement::from_string(
        DatabaseBackend::Postgres,
        format!(r#"SELECT version FROM "{HISTORY_TABLE}""#),
    ))
    .all(conn)
    .await?;
    Ok(records.into_iter().map(|r| r.version).collect())
}

async fn record(conn: &impl ConnectionTrait, name: &str) -> Result<()> {
    conn.execute(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        format!(r#"INSERT INTO "{HISTORY_TABLE}" (version) VALUES ($1)"#),
        [name.into()],
    ))
    .await?;
    Ok(())
}

async fn forget(conn: &impl ConnectionTrait, name: &str) -> Result<()> {
    conn.execute(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        format!(r#"DELETE FROM "{HISTORY_TABLE}" WHERE version = $1"#),
        [name.into()],
    ))
    .await?;
    Ok(())
}

/// Apply every unrecorded step of `ledger`, in ledger order.
///
/// Step states in `ledger` are updated to match the history table.
///
/// # Errors
/// Duplicate step names, or the first failing step. Steps applied before
/// the failure stay applied.
pub async fn apply_pending<C>(conn: &C, ledger: &mut MigrationLedger) -> Result<MigrationResult>
where
    C: ConnectionTrait + TransactionTrait,
{
    ledger.check_unique()?;
    let recorded = applied_steps(conn).await?;
    let mut result = MigrationResult::default();

    for step in ledger.steps_mut() {
        step.sync_recorded(recorded.contains(&step.name));
        if recorded.contains(&step.name) {
            debug!(step = %step.name, "RLS migration already applied, skipping");
            result.skipped += 1;
            continue;
        }

        info!(step = %step.name, "Applying RLS migration");
        let migration = RunDynamicSql::from_step(step);
        let txn = conn.begin().await?;
        let res: Result<()> = async {
            migration.up(&SchemaManager::new(&txn)).await?;
            record(&txn, &step.name).await
        }
        .await;

        match res {
            Ok(()) => txn.commit().await?,
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    debug!(error = %rollback_err, "Rollback after failed RLS migration failed");
                }
                return Err(err);
            }
        }

        step.apply()?;
        info!(step = %step.name, "RLS migration applied");
        result.applied += 1;
        result.applied_names.push(step.name.clone());
    }

    info!(
        applied = result.applied,
        skipped = result.skipped,
        "RLS migration run complete"
    );
    Ok(result)
}

/// Revert the last recorded step of `ledger` (in ledger order).
///
/// Returns an empty result when nothing is recorded.
///
/// # Errors
/// Duplicate step names, or a failing backward batch.
pub async fn revert_last<C>(conn: &C, ledger: &mut MigrationLedger) -> Result<MigrationResult>
where
    C: ConnectionTrait + TransactionTrait,
{
    ledger.check_unique()?;
    let recorded = applied_steps(conn).await?;
    for step in ledger.steps_mut() {
        step.sync_recorded(recorded.contains(&step.name));
    }

    let Some(step) = ledger
        .steps_mut()
        .iter_mut()
        .rev()
        .find(|s| recorded.contains(&s.name))
    else {
        info!("No applied RLS migrations to revert");
        return Ok(MigrationResult::default());
    };

    info!(step = %step.name, "Reverting RLS migration");
    let migration = RunDynamicSql::from_step(step);
    let txn = conn.begin().await?;
    let res: Result<()> = async {
        migration.down(&SchemaManager::new(&txn)).await?;
        forget(&txn, &step.name).await
    }
    .await;

    match res {
        Ok(()) => txn.commit().await?,
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                debug!(error = %rollback_err, "Rollback after failed RLS revert failed");
            }
            return Err(err);
        }
    }

    step.revert()?;
    info!(step = %step.name, "RLS migration reverted");
    Ok(MigrationResult {
        applied: 1,
        skipped: 0,
        applied_names: vec![step.name.clone()],
    })
}
