//! database migrations for the advisory mirror.

pub use sea_orm_migration::prelude::*;

mod m20241001_000001_create_upstream_advisories;
mod m20241001_000002_create_catalog;
mod m20241001_000003_create_local_advisories;
mod m20241001_000004_create_workflow_runs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20241001_000001_create_upstream_advisories::Migration),
            Box::new(m20241001_000002_create_catalog::Migration),
            Box::new(m20241001_000003_create_local_advisories::Migration),
            Box::new(m20241001_000004_create_workflow_runs::Migration),
        ]
    }
}
