//! Durable at-least-once message queue.
//!
//! Semantics follow the managed queues the worker was designed for:
//! receiving a message hides it for a visibility timeout and hands out a
//! fresh receipt handle; only a `delete` with that handle removes it. A
//! message that is received but never deleted shows up again once the
//! timeout expires, which is how failed events get retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, sea_query::Expr,
};
use uuid::Uuid;

use crate::{EngineError, ResultEngine};

/// A message handed out by `MessageQueue::receive`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub id: String,
    /// Handle to pass to `MessageQueue::delete`. Only valid until the
    /// message becomes visible again.
    pub receipt_handle: String,
    pub body: String,
    /// How many times the message has been received, this time included.
    pub receive_count: u32,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueues `body` and returns the message id.
    async fn send(&self, body: &str) -> ResultEngine<String>;

    /// Long-polls for up to `wait` and returns at most `max_messages`
    /// messages. An empty vector means nothing became visible in time.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> ResultEngine<Vec<ReceivedMessage>>;

    /// Acknowledges a received message. Stale or unknown handles are
    /// ignored.
    async fn delete(&self, receipt_handle: &str) -> ResultEngine<()>;
}

pub(crate) mod messages {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "queue_messages")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub queue_name: String,
        pub body: String,
        pub receipt_handle: Option<String>,
        pub visible_at: DateTimeUtc,
        pub receive_count: i32,
        pub created_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// `MessageQueue` stored in the `queue_messages` table.
///
/// Several queues can share the table; each `DbQueue` only sees the rows of
/// its own `queue_name`.
#[derive(Clone, Debug)]
pub struct DbQueue {
    database: DatabaseConnection,
    queue_name: String,
    visibility_timeout: TimeDelta,
    poll_interval: Duration,
}

impl DbQueue {
    /// Resolves the queue `queue_name`. Fails when the name is empty or the
    /// visibility timeout is out of range.
    pub fn open(
        database: DatabaseConnection,
        queue_name: impl Into<String>,
        visibility_timeout: Duration,
    ) -> ResultEngine<Self> {
        let queue_name = queue_name.into().trim().to_string();
        if queue_name.is_empty() {
            return Err(EngineError::Queue("queue name not configured".to_string()));
        }
        let visibility_timeout = TimeDelta::from_std(visibility_timeout)
            .map_err(|_| EngineError::Queue("visibility timeout out of range".to_string()))?;

        Ok(Self {
            database,
            queue_name,
            visibility_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// How often `receive` re-checks the table while long-polling.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.queue_name
    }

    /// Number of messages in the queue, visible or in flight.
    pub async fn depth(&self) -> ResultEngine<u64> {
        let count = messages::Entity::find()
            .filter(messages::Column::QueueName.eq(self.queue_name.clone()))
            .count(&self.database)
            .await?;
        Ok(count)
    }

    async fn claim_visible(&self, max_messages: usize) -> ResultEngine<Vec<ReceivedMessage>> {
        let now = Utc::now();
        let candidates = messages::Entity::find()
            .filter(messages::Column::QueueName.eq(self.queue_name.clone()))
            .filter(messages::Column::VisibleAt.lte(now))
            .order_by_asc(messages::Column::CreatedAt)
            .limit(max_messages as u64)
            .all(&self.database)
            .await?;

        let invisible_until = now + self.visibility_timeout;
        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let receipt_handle = Uuid::new_v4().to_string();
            // Conditional on the message still being visible: a concurrent
            // consumer that claimed it first wins and we skip it.
            let result = messages::Entity::update_many()
                .col_expr(
                    messages::Column::ReceiptHandle,
                    Expr::value(receipt_handle.clone()),
                )
                .col_expr(messages::Column::VisibleAt, Expr::value(invisible_until))
                .col_expr(
                    messages::Column::ReceiveCount,
                    Expr::col(messages::Column::ReceiveCount).add(1),
                )
                .filter(messages::Column::Id.eq(candidate.id.clone()))
                .filter(messages::Column::VisibleAt.lte(now))
                .exec(&self.database)
                .await?;

            if result.rows_affected == 1 {
                claimed.push(ReceivedMessage {
                    id: candidate.id,
                    receipt_handle,
                    body: candidate.body,
                    receive_count: u32::try_from(candidate.receive_count + 1).unwrap_or(u32::MAX),
                });
            }
        }

        Ok(claimed)
    }
}

#[async_trait]
impl MessageQueue for DbQueue {
    async fn send(&self, body: &str) -> ResultEngine<String> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let message = messages::ActiveModel {
            id: sea_orm::ActiveValue::Set(id.clone()),
            queue_name: sea_orm::ActiveValue::Set(self.queue_name.clone()),
            body: sea_orm::ActiveValue::Set(body.to_string()),
            receipt_handle: sea_orm::ActiveValue::Set(None),
            visible_at: sea_orm::ActiveValue::Set(now),
            receive_count: sea_orm::ActiveValue::Set(0),
            created_at: sea_orm::ActiveValue::Set(now),
        };
        message.insert(&self.database).await?;
        Ok(id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> ResultEngine<Vec<ReceivedMessage>> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let claimed = self.claim_visible(max_messages).await?;
            if !claimed.is_empty() {
                return Ok(claimed);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(claimed);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> ResultEngine<()> {
        let result = messages::Entity::delete_many()
            .filter(messages::Column::QueueName.eq(self.queue_name.clone()))
            .filter(messages::Column::ReceiptHandle.eq(receipt_handle))
            .exec(&self.database)
            .await?;
        if result.rows_affected == 0 {
            tracing::debug!("stale receipt handle {receipt_handle}, nothing deleted");
        }
        Ok(())
    }
}
