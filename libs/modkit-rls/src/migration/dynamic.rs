use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, DbErr};
use sea_orm_migration::{MigrationName, MigrationTrait, SchemaManager};

use super::step::PolicyMigrationStep;

type SqlFn = Box<dyn Fn(DatabaseBackend) -> Result<String, DbErr> + Send + Sync>;

/// Reversible migration whose SQL is produced when it runs.
///
/// Each function receives the live backend and returns the SQL batch to
/// execute inside the migration's transaction. Plugs into any
/// `sea_orm_migration` migrator.
pub struct RunDynamicSql {
    name: String,
    forward: SqlFn,
    backward: SqlFn,
}

impl RunDynamicSql {
    #[must_use]
    pub fn new<F, B>(name: impl Into<String>, forward: F, backward: B) -> Self
    where
        F: Fn(DatabaseBackend) -> Result<String, DbErr> + Send + Sync + 'static,
        B: Fn(DatabaseBackend) -> Result<String, DbErr> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            forward: Box::new(forward),
            backward: Box::new(backward),
        }
    }

    /// Migration running `step`'s SQL; refuses non-PostgreSQL backends.
    #[must_use]
    pub fn from_step(step: &PolicyMigrationStep) -> Self {
        let forward = step.forward_sql.clone();
        let backward = step.backward_sql.clone();
        Self::new(
            step.name.clone(),
            move |backend| postgres_only(backend).map(|()| forward.clone()),
            move |backend| postgres_only(backend).map(|()| backward.clone()),
        )
    }

    async fn run(&self, manager: &SchemaManager<'_>, sql: &SqlFn) -> Result<(), DbErr> {
        let db = manager.get_connection();
        let sql = sql(db.get_database_backend())?;
        db.execute_unprepared(&sql).await?;
        Ok(())
    }
}

fn postgres_only(backend: DatabaseBackend) -> Result<(), DbErr> {
    match backend {
        DatabaseBackend::Postgres => Ok(()),
        DatabaseBackend::MySql | DatabaseBackend::Sqlite => Err(DbErr::Custom(
            "row level security policies require PostgreSQL".to_owned(),
        )),
    }
}

impl MigrationName for RunDynamicSql {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl MigrationTrait for RunDynamicSql {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.run(manager, &self.forward).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.run(manager, &self.backward).await
    }
}

impl std::fmt::Debug for RunDynamicSql {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunDynamicSql")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
