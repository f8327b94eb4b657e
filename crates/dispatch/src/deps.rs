use std::{sync::Arc, time::Duration};

use engine::{BudgetWorker, DbQueue, EngineError, MessageQueue};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio::sync::OnceCell;

use crate::DispatchError;

/// What `Dependencies::connect` needs to know.
#[derive(Clone, Debug)]
pub struct DependencySettings {
    pub database_url: String,
    /// `None` when the process never reads the queue itself (push mode).
    pub queue_name: Option<String>,
    pub visibility_timeout: Duration,
}

/// Everything the adapters share, created once per process.
#[derive(Clone)]
pub struct Dependencies {
    pub database: DatabaseConnection,
    pub worker: Arc<BudgetWorker>,
    pub queue: Option<Arc<DbQueue>>,
}

impl Dependencies {
    /// Connects to the database, applies pending migrations and wires the
    /// worker (and the queue, when configured).
    pub async fn connect(settings: &DependencySettings) -> Result<Self, DispatchError> {
        let database = sea_orm::Database::connect(&settings.database_url).await?;
        Migrator::up(&database, None).await?;
        tracing::info!("database ready");
        Self::from_database(database, settings)
    }

    /// Wires the worker and the queue on an already migrated database.
    pub fn from_database(
        database: DatabaseConnection,
        settings: &DependencySettings,
    ) -> Result<Self, DispatchError> {
        let worker = BudgetWorker::builder().database(database.clone()).build()?;
        let queue = match &settings.queue_name {
            Some(name) => Some(Arc::new(DbQueue::open(
                database.clone(),
                name.as_str(),
                settings.visibility_timeout,
            )?)),
            None => None,
        };

        Ok(Self {
            database,
            worker: Arc::new(worker),
            queue,
        })
    }

    /// The queue, for adapters that cannot run without one.
    pub fn require_queue(&self) -> Result<Arc<dyn MessageQueue>, DispatchError> {
        match &self.queue {
            Some(queue) => Ok(queue.clone()),
            None => Err(EngineError::Queue("queue name not configured".to_string()).into()),
        }
    }
}

/// `Dependencies` built on first use.
///
/// Concurrent callers of `get` during the first initialisation wait for the
/// same attempt. A failed attempt is not cached: the next call tries again.
pub struct LazyDependencies {
    settings: DependencySettings,
    cell: OnceCell<Dependencies>,
}

impl LazyDependencies {
    pub fn new(settings: DependencySettings) -> Self {
        Self {
            settings,
            cell: OnceCell::new(),
        }
    }

    /// Wraps dependencies that are already built.
    pub fn ready(settings: DependencySettings, dependencies: Dependencies) -> Self {
        Self {
            settings,
            cell: OnceCell::new_with(Some(dependencies)),
        }
    }

    pub async fn get(&self) -> Result<&Dependencies, DispatchError> {
        self.cell
            .get_or_try_init(|| Dependencies::connect(&self.settings))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(database_url: &str, queue_name: Option<&str>) -> DependencySettings {
        DependencySettings {
            database_url: database_url.to_string(),
            queue_name: queue_name.map(str::to_string),
            visibility_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn connect_without_queue() {
        let deps = Dependencies::connect(&settings("sqlite::memory:", None))
            .await
            .unwrap();
        assert!(deps.queue.is_none());
        assert!(matches!(
            deps.require_queue(),
            Err(DispatchError::Engine(EngineError::Queue(_)))
        ));
    }

    #[tokio::test]
    async fn empty_queue_name_fails() {
        let err = Dependencies::connect(&settings("sqlite::memory:", Some("")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::Engine(EngineError::Queue(_))));
    }

    #[tokio::test]
    async fn lazy_initialises_once() {
        let lazy = Arc::new(LazyDependencies::new(settings(
            "sqlite::memory:",
            Some("transactions"),
        )));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let lazy = Arc::clone(&lazy);
            tasks.spawn(async move {
                let deps = lazy.get().await.unwrap();
                Arc::as_ptr(&deps.worker) as usize
            });
        }

        let mut seen = Vec::new();
        while let Some(ptr) = tasks.join_next().await {
            seen.push(ptr.unwrap());
        }
        seen.dedup();
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn lazy_failure_is_retried() {
        let lazy = LazyDependencies::new(settings("sqlite:/nonexistent/dir/db.sqlite", None));
        assert!(lazy.get().await.is_err());
        assert!(lazy.get().await.is_err());
    }
}
