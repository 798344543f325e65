use sea_orm_migration::prelude::*;

mod m20250101_000001_init;
mod m20251014_000002_attached_functions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_init::Migration),
            Box::new(m20251014_000002_attached_functions::Migration),
        ]
    }
}
