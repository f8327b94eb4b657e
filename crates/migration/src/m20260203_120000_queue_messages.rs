//! Durable message queue used between the transaction recorder and the
//! budget worker.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum QueueMessages {
    Table,
    Id,
    QueueName,
    Body,
    ReceiptHandle,
    VisibleAt,
    ReceiveCount,
    CreatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(QueueMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(QueueMessages::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(QueueMessages::QueueName).string().not_null())
                    .col(ColumnDef::new(QueueMessages::Body).text().not_null())
                    .col(ColumnDef::new(QueueMessages::ReceiptHandle).string())
                    .col(
                        ColumnDef::new(QueueMessages::VisibleAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(QueueMessages::ReceiveCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(QueueMessages::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-queue_messages-queue_name-visible_at")
                    .table(QueueMessages::Table)
                    .col(QueueMessages::QueueName)
                    .col(QueueMessages::VisibleAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-queue_messages-receipt_handle")
                    .table(QueueMessages::Table)
                    .col(QueueMessages::ReceiptHandle)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("uidx-queue_messages-receipt_handle")
                    .table(QueueMessages::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx-queue_messages-queue_name-visible_at")
                    .table(QueueMessages::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(QueueMessages::Table).to_owned())
            .await?;

        Ok(())
    }
}
