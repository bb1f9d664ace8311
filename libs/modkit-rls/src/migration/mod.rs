//! Migration emitter.
//!
//! Turns [`PolicyDefinition`]s into reversible SQL, wraps them in
//! [`PolicyMigrationStep`]s with an explicit `pending -> applied -> reverted`
//! lifecycle, and exposes them to `sea_orm_migration` through [`RunDynamicSql`].

mod dynamic;
mod emitter;
mod step;

use sea_orm_migration::MigrationTrait;

pub use dynamic::RunDynamicSql;
pub use emitter::{PolicyDefinition, emit_backward, emit_forward};
pub use step::{MigrationExecutor, MigrationLedger, PolicyMigrationStep, StepState};

impl MigrationLedger {
    /// Every step as a `sea_orm_migration` migration, in ledger order.
    #[must_use]
    pub fn migrations(&self) -> Vec<Box<dyn MigrationTrait>> {
        self.steps()
            .iter()
            .map(|step| Box::new(RunDynamicSql::from_step(step)) as Box<dyn MigrationTrait>)
            .collect()
    }
}
