//! Idempotency ledger for inbound transaction events.
//!
//! A row asserts that a transaction already produced its budget effects. The
//! row id *is* the transaction id, so a second insert for the same
//! transaction conflicts on the primary key.

use chrono::{DateTime, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedTransaction {
    pub transaction_id: String,
    pub user_id: String,
    /// Raw event type, kept even for types the worker ignores.
    pub kind: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "processed_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub transaction_id: String,
    pub user_id: String,
    pub kind: String,
    pub processed_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&ProcessedTransaction> for ActiveModel {
    fn from(value: &ProcessedTransaction) -> Self {
        Self {
            id: ActiveValue::Set(value.transaction_id.clone()),
            transaction_id: ActiveValue::Set(value.transaction_id.clone()),
            user_id: ActiveValue::Set(value.user_id.clone()),
            kind: ActiveValue::Set(value.kind.clone()),
            processed_at: ActiveValue::Set(value.processed_at),
        }
    }
}

impl From<Model> for ProcessedTransaction {
    fn from(value: Model) -> Self {
        Self {
            transaction_id: value.transaction_id,
            user_id: value.user_id,
            kind: value.kind,
            processed_at: value.processed_at,
        }
    }
}
