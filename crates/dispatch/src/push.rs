//! Push adapter: the invoker owns the queue and posts batches of records.
//!
//! Every record is processed and the batch is always acknowledged with
//! `200`, failed records included: their markers were rolled back, so a
//! redelivery by the invoker starts clean. The one exception is a failure to
//! bring the dependencies up, answered with `503` so the invoker retries the
//! whole batch.

use std::{future::Future, sync::Arc};

use api_types::batch::{BatchSummary, QueueBatch};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use engine::BudgetWorker;

use crate::{DispatchError, LazyDependencies, record};

#[derive(Clone)]
struct PushState {
    dependencies: Arc<LazyDependencies>,
}

pub fn router(dependencies: Arc<LazyDependencies>) -> Router {
    Router::new()
        .route("/invoke", post(invoke))
        .route("/health", get(health))
        .with_state(PushState { dependencies })
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn invoke(
    State(state): State<PushState>,
    Json(batch): Json<QueueBatch>,
) -> Result<Json<BatchSummary>, DispatchError> {
    let dependencies = state.dependencies.get().await?;
    let summary = process_batch(&dependencies.worker, &batch).await;
    tracing::info!(
        "batch done: {} received, {} processed, {} failed",
        summary.received,
        summary.processed,
        summary.failed
    );
    Ok(Json(summary))
}

/// Runs every record of `batch` through `worker`, in order.
pub async fn process_batch(worker: &BudgetWorker, batch: &QueueBatch) -> BatchSummary {
    let mut summary = BatchSummary {
        received: batch.records.len(),
        ..Default::default()
    };

    for message in &batch.records {
        let result = worker.process_message(&message.body).await;
        record(&mut summary, &message.message_id, &result);
    }

    summary
}

/// Serves the push endpoint on `listener` until `shutdown` resolves.
pub async fn run_with_listener<F>(
    dependencies: Arc<LazyDependencies>,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> Result<(), DispatchError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("Push endpoint listening on {}", addr);

    axum::serve(listener, router(dependencies))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
