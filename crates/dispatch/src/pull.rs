//! Pull adapter: long-polls the queue and feeds the worker.

use std::{future::Future, sync::Arc, time::Duration};

use api_types::batch::BatchSummary;
use engine::{BudgetWorker, MessageQueue, ReceivedMessage, ResultEngine};

use crate::record;

#[derive(Clone, Debug)]
pub struct PullSettings {
    /// Upper bound of messages per poll.
    pub max_messages: usize,
    /// How long a poll waits for messages before returning empty.
    pub wait_time: Duration,
    /// Pause after a failed poll.
    pub error_backoff: Duration,
}

impl Default for PullSettings {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(10),
            error_backoff: Duration::from_secs(5),
        }
    }
}

pub struct PullWorker {
    queue: Arc<dyn MessageQueue>,
    worker: Arc<BudgetWorker>,
    settings: PullSettings,
}

impl PullWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        worker: Arc<BudgetWorker>,
        settings: PullSettings,
    ) -> Self {
        Self {
            queue,
            worker,
            settings,
        }
    }

    /// Polls and processes until `shutdown` resolves.
    ///
    /// Shutdown is observed while waiting for messages or backing off, never
    /// in the middle of a message.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            "pull loop started (batch {}, wait {:?})",
            self.settings.max_messages,
            self.settings.wait_time
        );
        tokio::pin!(shutdown);

        loop {
            let polled = tokio::select! {
                _ = &mut shutdown => break,
                polled = self.poll() => polled,
            };

            match polled {
                Ok(messages) => {
                    self.handle(messages).await;
                }
                Err(err) => {
                    tracing::error!(
                        "failed to receive messages, retrying in {:?}: {err}",
                        self.settings.error_backoff
                    );
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("pull loop stopped");
    }

    /// One poll followed by the processing of whatever it returned.
    pub async fn run_once(&self) -> ResultEngine<BatchSummary> {
        let messages = self.poll().await?;
        Ok(self.handle(messages).await)
    }

    async fn poll(&self) -> ResultEngine<Vec<ReceivedMessage>> {
        self.queue
            .receive(self.settings.max_messages, self.settings.wait_time)
            .await
    }

    async fn handle(&self, messages: Vec<ReceivedMessage>) -> BatchSummary {
        let mut summary = BatchSummary {
            received: messages.len(),
            ..Default::default()
        };

        for message in messages {
            if message.body.trim().is_empty() {
                tracing::warn!("message {}: empty body, deleting", message.id);
                summary.discarded += 1;
                self.delete(&message).await;
                continue;
            }

            let result = self.worker.process_message(&message.body).await;
            record(&mut summary, &message.id, &result);

            let retry = matches!(&result, Err(err) if err.is_retryable());
            if !retry {
                self.delete(&message).await;
            }
        }

        summary
    }

    async fn delete(&self, message: &ReceivedMessage) {
        if let Err(err) = self.queue.delete(&message.receipt_handle).await {
            tracing::error!("failed to delete message {}: {err}", message.id);
        }
    }
}
