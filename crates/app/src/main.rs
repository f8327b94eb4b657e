use std::{process::ExitCode, sync::Arc};

use dispatch::{Dependencies, LazyDependencies, pull::PullWorker, push};

use crate::{error::AppError, settings::Settings};

mod error;
mod settings;

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("failed to load settings: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "spendsync={level},dispatch={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let result = if settings::worker_local() {
        run_pull(&settings).await
    } else {
        run_push(&settings).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("worker failed: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run_pull(settings: &Settings) -> Result<(), AppError> {
    tracing::info!("Starting in pull mode on queue {:?}", settings.queue.name);
    let dependencies = Dependencies::connect(&settings.dependencies(true)).await?;
    let queue = dependencies.require_queue()?;

    PullWorker::new(queue, dependencies.worker.clone(), settings.pull_settings())
        .run(shutdown_signal())
        .await;
    Ok(())
}

async fn run_push(settings: &Settings) -> Result<(), AppError> {
    tracing::info!("Starting in push mode");
    let dependencies = Arc::new(LazyDependencies::new(settings.dependencies(false)));

    let addr = format!("{}:{}", settings.push.bind, settings.push.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    push::run_with_listener(dependencies, listener, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
