use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum ProcessedTransactions {
    Table,
    Id,
    TransactionId,
    UserId,
    Kind,
    ProcessedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // The primary key is the source transaction id: a second insert for
        // the same transaction must conflict.
        manager
            .create_table(
                Table::create()
                    .table(ProcessedTransactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProcessedTransactions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProcessedTransactions::TransactionId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProcessedTransactions::UserId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProcessedTransactions::Kind).string().not_null())
                    .col(
                        ColumnDef::new(ProcessedTransactions::ProcessedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-processed_transactions-user_id")
                    .table(ProcessedTransactions::Table)
                    .col(ProcessedTransactions::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx-processed_transactions-user_id")
                    .table(ProcessedTransactions::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ProcessedTransactions::Table).to_owned())
            .await?;

        Ok(())
    }
}
