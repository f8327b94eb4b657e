//! Delivery of queued transaction events to the budget worker.
//!
//! Two adapters share the same worker:
//!
//! - [`push`]: an HTTP endpoint receiving batches from an invoker that owns
//!   the queue.
//! - [`pull`]: a long-poll loop consuming the queue directly.

use api_types::batch::BatchSummary;
use axum::{Json, http::StatusCode, response::IntoResponse};
use engine::{EngineError, Outcome, WorkerError};
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

pub use deps::{Dependencies, DependencySettings, LazyDependencies};

mod deps;
pub mod pull;
pub mod push;

/// Failures while bringing the dispatch dependencies up.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct Error {
    error: String,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("dependencies unavailable: {self}");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Error {
                error: "dependencies unavailable".to_string(),
            }),
        )
            .into_response()
    }
}

/// Logs the result of processing the message `message_id` and counts it in
/// `summary`.
pub(crate) fn record(
    summary: &mut BatchSummary,
    message_id: &str,
    result: &Result<Outcome, WorkerError>,
) {
    match result {
        Ok(Outcome::Applied { budgets }) => {
            tracing::info!("message {message_id}: applied to {budgets} budget(s)");
            summary.processed += 1;
        }
        Ok(Outcome::Duplicate) => {
            tracing::debug!("message {message_id}: duplicate");
            summary.duplicates += 1;
        }
        Ok(Outcome::IgnoredKind | Outcome::ZeroDelta) => {
            tracing::debug!("message {message_id}: nothing to apply");
            summary.ignored += 1;
        }
        Err(err @ WorkerError::Malformed(_)) => {
            tracing::warn!("message {message_id}: discarded, {err}");
            summary.discarded += 1;
        }
        Err(err) => {
            tracing::error!("message {message_id}: failed, will be retried: {err}");
            summary.failed += 1;
        }
    }
}
