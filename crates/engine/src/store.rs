//! Persistence seams used by the budget worker.
//!
//! The worker only talks to these traits, so tests can wrap the database
//! stores to inject failures, and deployments can swap the backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Budget, MoneyCents, ProcessedTransaction, ResultEngine};

pub use budgets::DbBudgetStore;
pub use markers::DbMarkerStore;

mod budgets;
mod markers;

/// Budgets persistence.
#[async_trait]
pub trait BudgetStore: Send + Sync {
    async fn create(&self, budget: &Budget) -> ResultEngine<()>;

    /// Overwrites the descriptive fields of a budget (limit, currency,
    /// period, window, alert threshold). `spent` is left untouched.
    async fn update(&self, budget: &Budget) -> ResultEngine<()>;

    async fn get_by_id(&self, id: Uuid, user_id: &str) -> ResultEngine<Option<Budget>>;

    async fn list(&self, user_id: &str, limit: u64, offset: u64) -> ResultEngine<Vec<Budget>>;

    /// Absolute overwrite of `spent`.
    ///
    /// Fails with `KeyNotFound` unless a budget matches both `id` and
    /// `user_id`.
    async fn update_spent(&self, id: Uuid, user_id: &str, spent: MoneyCents) -> ResultEngine<()>;

    /// Atomically applies `spent = max(0, spent + delta)` and returns the
    /// updated budget.
    ///
    /// Fails with `KeyNotFound` unless a budget matches both `id` and
    /// `user_id`.
    async fn apply_spent_delta(
        &self,
        id: Uuid,
        user_id: &str,
        delta: MoneyCents,
    ) -> ResultEngine<Budget>;

    /// All budgets of `user_id` for `category_id` whose inclusive window
    /// contains `at`.
    async fn find_active_by_category(
        &self,
        user_id: &str,
        category_id: &str,
        at: DateTime<Utc>,
    ) -> ResultEngine<Vec<Budget>>;
}

/// Processed-transaction markers persistence.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Inserts the marker for `transaction_id` unless one already exists.
    ///
    /// Returns `false` when the marker was already there. The check and the
    /// insert are a single atomic operation.
    async fn mark_processed(
        &self,
        transaction_id: &str,
        user_id: &str,
        kind: &str,
        processed_at: DateTime<Utc>,
    ) -> ResultEngine<bool>;

    /// Deletes the marker. Unknown ids are not an error.
    async fn remove(&self, transaction_id: &str) -> ResultEngine<()>;

    async fn get(&self, transaction_id: &str) -> ResultEngine<Option<ProcessedTransaction>>;
}
