pub use sea_orm_migration::prelude::*;

mod m20260201_090000_budgets;
mod m20260201_091000_processed_transactions;
mod m20260203_120000_queue_messages;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260201_090000_budgets::Migration),
            Box::new(m20260201_091000_processed_transactions::Migration),
            Box::new(m20260203_120000_queue_messages::Migration),
        ]
    }
}
