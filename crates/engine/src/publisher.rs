//! Publication of `TransactionRecorded` events.
//!
//! Publishing is best-effort from the recorder's point of view: once a
//! transaction is persisted, a failed publish must never undo it. The
//! `BackgroundPublisher` makes that explicit by handing events to a task
//! that reports failures on its own channel.

use std::sync::Arc;

use api_types::event::TransactionRecorded;
use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{EngineError, MessageQueue, ResultEngine};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &TransactionRecorded) -> ResultEngine<()>;
}

/// Publishes events as JSON messages on a `MessageQueue`.
#[derive(Clone)]
pub struct QueuePublisher {
    queue: Arc<dyn MessageQueue>,
}

impl QueuePublisher {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl EventPublisher for QueuePublisher {
    async fn publish(&self, event: &TransactionRecorded) -> ResultEngine<()> {
        let body = serde_json::to_string(event)?;
        let message_id = self.queue.send(&body).await?;
        tracing::debug!(
            "published transaction {} as message {message_id}",
            event.transaction_id
        );
        Ok(())
    }
}

/// A publish that did not make it to the queue.
#[derive(Debug)]
pub struct PublishFailure {
    pub transaction_id: String,
    pub error: EngineError,
}

/// Fire-and-forget front of an `EventPublisher`.
///
/// `publish` never blocks and never fails the caller. Events that cannot be
/// handed over (buffer full, task gone) and events the inner publisher
/// rejects are logged and sent to the failure channel returned by `spawn`.
pub struct BackgroundPublisher {
    sender: mpsc::Sender<TransactionRecorded>,
    failures: mpsc::UnboundedSender<PublishFailure>,
    task: JoinHandle<()>,
}

impl BackgroundPublisher {
    /// Starts the background task. `capacity` bounds the number of events
    /// waiting to be published.
    pub fn spawn(
        inner: Arc<dyn EventPublisher>,
        capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<PublishFailure>) {
        let (sender, mut receiver) = mpsc::channel::<TransactionRecorded>(capacity.max(1));
        let (failures, failures_rx) = mpsc::unbounded_channel();

        let task_failures = failures.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(error) = inner.publish(&event).await {
                    tracing::error!(
                        "failed to publish transaction {}: {error}",
                        event.transaction_id
                    );
                    // Nobody listening is fine: the log line is the record.
                    let _ = task_failures.send(PublishFailure {
                        transaction_id: event.transaction_id,
                        error,
                    });
                }
            }
        });

        (
            Self {
                sender,
                failures,
                task,
            },
            failures_rx,
        )
    }

    /// Hands `event` to the background task without waiting for it to be
    /// published.
    pub fn publish(&self, event: TransactionRecorded) {
        if let Err(err) = self.sender.try_send(event) {
            let (reason, event) = match err {
                mpsc::error::TrySendError::Full(event) => ("publish buffer full", event),
                mpsc::error::TrySendError::Closed(event) => ("publisher stopped", event),
            };
            tracing::error!(
                "failed to hand over transaction {}: {reason}",
                event.transaction_id
            );
            let _ = self.failures.send(PublishFailure {
                transaction_id: event.transaction_id,
                error: EngineError::Queue(reason.to_string()),
            });
        }
    }

    /// Stops accepting events and waits until every buffered event has been
    /// attempted.
    pub async fn shutdown(self) {
        let Self { sender, task, .. } = self;
        drop(sender);
        if let Err(err) = task.await {
            tracing::error!("publisher task ended abnormally: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;

    #[derive(Default)]
    struct Recording {
        published: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl EventPublisher for Recording {
        async fn publish(&self, event: &TransactionRecorded) -> ResultEngine<()> {
            if self.fail_for.as_deref() == Some(event.transaction_id.as_str()) {
                return Err(EngineError::Queue("queue unavailable".to_string()));
            }
            self.published
                .lock()
                .unwrap()
                .push(event.transaction_id.clone());
            Ok(())
        }
    }

    fn event(id: &str) -> TransactionRecorded {
        TransactionRecorded {
            transaction_id: id.to_string(),
            user_id: "alice".to_string(),
            account_id: "acc-1".to_string(),
            category_id: "groceries".to_string(),
            amount: 10.0,
            currency: "EUR".to_string(),
            occurred_at: Utc::now(),
            kind: "expense".to_string(),
        }
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_events() {
        let inner = Arc::new(Recording::default());
        let (publisher, _failures) = BackgroundPublisher::spawn(inner.clone(), 8);

        publisher.publish(event("tx-1"));
        publisher.publish(event("tx-2"));
        publisher.shutdown().await;

        assert_eq!(*inner.published.lock().unwrap(), vec!["tx-1", "tx-2"]);
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let inner = Arc::new(Recording {
            fail_for: Some("tx-bad".to_string()),
            ..Default::default()
        });
        let (publisher, mut failures) = BackgroundPublisher::spawn(inner.clone(), 8);

        publisher.publish(event("tx-bad"));
        publisher.publish(event("tx-ok"));
        publisher.shutdown().await;

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.transaction_id, "tx-bad");
        assert_eq!(*inner.published.lock().unwrap(), vec!["tx-ok"]);
    }
}
