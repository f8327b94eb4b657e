//! The budget update worker.
//!
//! Consumes `TransactionRecorded` events and folds them into the `spent`
//! total of every budget whose window contains the transaction. Events are
//! delivered at least once, so the worker records a processed marker before
//! touching budgets and removes it again when a later step fails; the
//! redelivered event then starts from scratch.

use std::sync::Arc;

use api_types::event::TransactionRecorded;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use thiserror::Error;

use crate::{
    Budget, BudgetStore, DbBudgetStore, DbMarkerStore, EngineError, MarkerStore, MoneyCents,
    ResultEngine, TransactionKind,
};

/// Successful result of processing one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The delta was applied to `budgets` budgets (possibly none).
    Applied { budgets: usize },
    /// The event had already been processed.
    Duplicate,
    /// The event type does not affect budgets. The event is marked.
    IgnoredKind,
    /// The amount rounds to zero. The event is marked.
    ZeroDelta,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    /// The event can never be processed. It is not marked.
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error(transparent)]
    Store(#[from] EngineError),
}

impl WorkerError {
    /// Whether redelivering the same event may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Parses a queue message body into an event.
pub fn decode(body: &str) -> Result<TransactionRecorded, WorkerError> {
    serde_json::from_str(body).map_err(|err| WorkerError::Malformed(err.to_string()))
}

fn validate_ids(event: &TransactionRecorded) -> Result<(), WorkerError> {
    if event.transaction_id.trim().is_empty() {
        return Err(WorkerError::Malformed("empty transactionId".to_string()));
    }
    if event.user_id.trim().is_empty() {
        return Err(WorkerError::Malformed(format!(
            "empty userId for transaction {}",
            event.transaction_id
        )));
    }
    Ok(())
}

fn parse_amount(event: &TransactionRecorded) -> Result<MoneyCents, WorkerError> {
    MoneyCents::from_major(event.amount).map_err(|err| {
        WorkerError::Malformed(format!("transaction {}: {err}", event.transaction_id))
    })
}

/// Applies transaction events to budgets.
///
/// Holds no state between events; share it behind an `Arc` and call it from
/// as many tasks as needed.
#[derive(Clone)]
pub struct BudgetWorker {
    budgets: Arc<dyn BudgetStore>,
    markers: Arc<dyn MarkerStore>,
}

impl BudgetWorker {
    pub fn builder() -> BudgetWorkerBuilder {
        BudgetWorkerBuilder::default()
    }

    /// Decodes `body` and processes the event.
    pub async fn process_message(&self, body: &str) -> Result<Outcome, WorkerError> {
        let event = decode(body)?;
        self.process_event(&event).await
    }

    pub async fn process_event(&self, event: &TransactionRecorded) -> Result<Outcome, WorkerError> {
        validate_ids(event)?;

        // Only budget-affecting kinds need a usable amount; any other type is
        // marked whatever it carries.
        let kind = TransactionKind::from(event.kind.as_str());
        let delta = match kind {
            TransactionKind::Other(_) => None,
            _ => kind.spend_delta(parse_amount(event)?),
        };

        let inserted = self
            .markers
            .mark_processed(&event.transaction_id, &event.user_id, &event.kind, Utc::now())
            .await?;
        if !inserted {
            tracing::debug!(
                "transaction {} already processed, skipping",
                event.transaction_id
            );
            return Ok(Outcome::Duplicate);
        }

        let Some(delta) = delta else {
            tracing::warn!(
                "transaction {} has type {:?} which does not affect budgets",
                event.transaction_id,
                kind.as_str()
            );
            return Ok(Outcome::IgnoredKind);
        };
        if delta.is_zero() {
            tracing::debug!("transaction {} has a zero amount", event.transaction_id);
            return Ok(Outcome::ZeroDelta);
        }

        match self.apply(event, &kind, delta).await {
            Ok(budgets) => Ok(Outcome::Applied { budgets }),
            Err(err) => {
                if let Err(remove_err) = self.markers.remove(&event.transaction_id).await {
                    tracing::warn!(
                        "failed to remove marker of transaction {}: {remove_err}",
                        event.transaction_id
                    );
                }
                Err(err.into())
            }
        }
    }

    async fn apply(
        &self,
        event: &TransactionRecorded,
        kind: &TransactionKind,
        delta: MoneyCents,
    ) -> ResultEngine<usize> {
        let targets = self
            .budgets
            .find_active_by_category(&event.user_id, &event.category_id, event.occurred_at)
            .await?;
        if targets.is_empty() {
            tracing::debug!(
                "no active budget for user {} category {} at {}",
                event.user_id,
                event.category_id,
                event.occurred_at
            );
        }

        // A failure part way leaves earlier budgets updated; the redelivered
        // event applies the delta to them again.
        for budget in &targets {
            let updated = self
                .budgets
                .apply_spent_delta(budget.id, &event.user_id, delta)
                .await?;
            if *kind == TransactionKind::Expense && crossed_alert(&updated, delta) {
                tracing::warn!(
                    "budget {} of user {} reached {}% of its limit ({} / {} {})",
                    updated.id,
                    updated.user_id,
                    updated.alert_percent,
                    updated.spent,
                    updated.limit,
                    updated.currency
                );
            }
        }

        Ok(targets.len())
    }
}

/// Whether adding the positive `delta` moved `updated` into alert.
fn crossed_alert(updated: &Budget, delta: MoneyCents) -> bool {
    if !updated.alert_reached() {
        return false;
    }
    let mut before = updated.clone();
    before.spent = updated.spent - delta;
    !before.alert_reached()
}

/// Builder for `BudgetWorker`.
#[derive(Default)]
pub struct BudgetWorkerBuilder {
    budgets: Option<Arc<dyn BudgetStore>>,
    markers: Option<Arc<dyn MarkerStore>>,
}

impl BudgetWorkerBuilder {
    /// Uses the database-backed stores on `database`.
    #[must_use]
    pub fn database(mut self, database: DatabaseConnection) -> Self {
        self.budgets = Some(Arc::new(DbBudgetStore::new(database.clone())));
        self.markers = Some(Arc::new(DbMarkerStore::new(database)));
        self
    }

    #[must_use]
    pub fn budget_store(mut self, store: Arc<dyn BudgetStore>) -> Self {
        self.budgets = Some(store);
        self
    }

    #[must_use]
    pub fn marker_store(mut self, store: Arc<dyn MarkerStore>) -> Self {
        self.markers = Some(store);
        self
    }

    pub fn build(self) -> ResultEngine<BudgetWorker> {
        let budgets = self
            .budgets
            .ok_or_else(|| EngineError::MissingDependency("budget store".to_string()))?;
        let markers = self
            .markers
            .ok_or_else(|| EngineError::MissingDependency("marker store".to_string()))?;
        Ok(BudgetWorker { budgets, markers })
    }
}
