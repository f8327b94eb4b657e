use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr, EntityTrait, sea_query::OnConflict};

use crate::{ProcessedTransaction, ResultEngine, processed};

use super::MarkerStore;

/// `MarkerStore` backed by the `processed_transactions` table.
#[derive(Clone, Debug)]
pub struct DbMarkerStore {
    database: DatabaseConnection,
}

impl DbMarkerStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

#[async_trait]
impl MarkerStore for DbMarkerStore {
    async fn mark_processed(
        &self,
        transaction_id: &str,
        user_id: &str,
        kind: &str,
        processed_at: DateTime<Utc>,
    ) -> ResultEngine<bool> {
        let marker = ProcessedTransaction {
            transaction_id: transaction_id.to_string(),
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            processed_at,
        };

        // `ON CONFLICT DO NOTHING` keeps check-and-insert in one statement:
        // two deliveries of the same event racing here insert exactly once.
        let inserted = processed::Entity::insert(processed::ActiveModel::from(&marker))
            .on_conflict(
                OnConflict::column(processed::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.database)
            .await;

        match inserted {
            Ok(rows) => Ok(rows > 0),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, transaction_id: &str) -> ResultEngine<()> {
        processed::Entity::delete_by_id(transaction_id.to_string())
            .exec(&self.database)
            .await?;
        Ok(())
    }

    async fn get(&self, transaction_id: &str) -> ResultEngine<Option<ProcessedTransaction>> {
        let marker = processed::Entity::find_by_id(transaction_id.to_string())
            .one(&self.database)
            .await?;
        Ok(marker.map(ProcessedTransaction::from))
    }
}
