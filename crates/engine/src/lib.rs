pub use budgets::{Budget, BudgetPeriod};
pub use currency::Currency;
pub use error::EngineError;
pub use money::MoneyCents;
pub use processed::ProcessedTransaction;
pub use publisher::{BackgroundPublisher, EventPublisher, PublishFailure, QueuePublisher};
pub use queue::{DbQueue, MessageQueue, ReceivedMessage};
pub use store::{BudgetStore, DbBudgetStore, DbMarkerStore, MarkerStore};
pub use transactions::TransactionKind;
pub use worker::{BudgetWorker, BudgetWorkerBuilder, Outcome, WorkerError, decode};

mod budgets;
mod currency;
mod error;
mod money;
mod processed;
mod publisher;
mod queue;
mod store;
mod transactions;
mod worker;

pub type ResultEngine<T> = Result<T, EngineError>;
