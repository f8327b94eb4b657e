use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use api_types::event::TransactionRecorded;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

use engine::{
    Budget, BudgetPeriod, BudgetStore, BudgetWorker, Currency, DbBudgetStore, DbMarkerStore,
    EngineError, MarkerStore, MoneyCents, Outcome, ProcessedTransaction, ResultEngine,
    WorkerError,
};
use migration::MigratorTrait;

async fn database() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

fn january_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn mid_january() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 12, 30, 0).unwrap()
}

async fn seed_budget(
    store: &DbBudgetStore,
    user_id: &str,
    category_id: &str,
    period: BudgetPeriod,
    spent: MoneyCents,
) -> Budget {
    let start = january_start();
    let end = period.window_starting(start).unwrap();
    let budget = Budget::new(
        user_id.to_string(),
        category_id.to_string(),
        MoneyCents::new(200_00),
        Currency::Eur,
        period,
        start,
        end,
        80,
    )
    .unwrap();
    store.create(&budget).await.unwrap();
    if !spent.is_zero() {
        store.update_spent(budget.id, user_id, spent).await.unwrap();
    }
    budget
}

async fn spent_of(store: &DbBudgetStore, budget: &Budget) -> MoneyCents {
    store
        .get_by_id(budget.id, &budget.user_id)
        .await
        .unwrap()
        .unwrap()
        .spent
}

fn event(transaction_id: &str, kind: &str, amount: f64, at: DateTime<Utc>) -> TransactionRecorded {
    TransactionRecorded {
        transaction_id: transaction_id.to_string(),
        user_id: "alice".to_string(),
        account_id: "acc-1".to_string(),
        category_id: "groceries".to_string(),
        amount,
        currency: "EUR".to_string(),
        occurred_at: at,
        kind: kind.to_string(),
    }
}

fn worker(db: &DatabaseConnection) -> BudgetWorker {
    BudgetWorker::builder().database(db.clone()).build().unwrap()
}

/// Delegates to `DbBudgetStore` and fails on demand.
struct FlakyBudgets {
    inner: DbBudgetStore,
    fail_find: AtomicBool,
    /// 1-based index of the `apply_spent_delta` call that fails; 0 disables.
    fail_apply_at: AtomicUsize,
    apply_calls: AtomicUsize,
}

impl FlakyBudgets {
    fn new(db: &DatabaseConnection) -> Self {
        Self {
            inner: DbBudgetStore::new(db.clone()),
            fail_find: AtomicBool::new(false),
            fail_apply_at: AtomicUsize::new(0),
            apply_calls: AtomicUsize::new(0),
        }
    }

    fn heal(&self) {
        self.fail_find.store(false, Ordering::SeqCst);
        self.fail_apply_at.store(0, Ordering::SeqCst);
    }
}

fn unavailable() -> EngineError {
    EngineError::Database(sea_orm::DbErr::Custom("database unavailable".to_string()))
}

#[async_trait]
impl BudgetStore for FlakyBudgets {
    async fn create(&self, budget: &Budget) -> ResultEngine<()> {
        self.inner.create(budget).await
    }

    async fn update(&self, budget: &Budget) -> ResultEngine<()> {
        self.inner.update(budget).await
    }

    async fn get_by_id(&self, id: Uuid, user_id: &str) -> ResultEngine<Option<Budget>> {
        self.inner.get_by_id(id, user_id).await
    }

    async fn list(&self, user_id: &str, limit: u64, offset: u64) -> ResultEngine<Vec<Budget>> {
        self.inner.list(user_id, limit, offset).await
    }

    async fn update_spent(&self, id: Uuid, user_id: &str, spent: MoneyCents) -> ResultEngine<()> {
        self.inner.update_spent(id, user_id, spent).await
    }

    async fn apply_spent_delta(
        &self,
        id: Uuid,
        user_id: &str,
        delta: MoneyCents,
    ) -> ResultEngine<Budget> {
        let call = self.apply_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_apply_at.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.apply_spent_delta(id, user_id, delta).await
    }

    async fn find_active_by_category(
        &self,
        user_id: &str,
        category_id: &str,
        at: DateTime<Utc>,
    ) -> ResultEngine<Vec<Budget>> {
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner
            .find_active_by_category(user_id, category_id, at)
            .await
    }
}

/// Marker store whose `remove` always fails.
struct StickyMarkers {
    inner: DbMarkerStore,
}

#[async_trait]
impl MarkerStore for StickyMarkers {
    async fn mark_processed(
        &self,
        transaction_id: &str,
        user_id: &str,
        kind: &str,
        processed_at: DateTime<Utc>,
    ) -> ResultEngine<bool> {
        self.inner
            .mark_processed(transaction_id, user_id, kind, processed_at)
            .await
    }

    async fn remove(&self, _transaction_id: &str) -> ResultEngine<()> {
        Err(unavailable())
    }

    async fn get(&self, transaction_id: &str) -> ResultEngine<Option<ProcessedTransaction>> {
        self.inner.get(transaction_id).await
    }
}

#[tokio::test]
async fn groceries_expense_is_applied_once() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let markers = DbMarkerStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::new(40_00),
    )
    .await;
    let worker = worker(&db);

    let body = serde_json::to_string(&event("tx-1", "expense", 25.0, mid_january())).unwrap();
    assert_eq!(
        worker.process_message(&body).await.unwrap(),
        Outcome::Applied { budgets: 1 }
    );
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(65_00));

    let marker = markers.get("tx-1").await.unwrap().unwrap();
    assert_eq!(marker.user_id, "alice");
    assert_eq!(marker.kind, "expense");

    // Redelivery of the same message.
    assert_eq!(
        worker.process_message(&body).await.unwrap(),
        Outcome::Duplicate
    );
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(65_00));
}

#[tokio::test]
async fn negative_expense_amount_counts_by_magnitude() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::ZERO,
    )
    .await;

    worker(&db)
        .process_event(&event("tx-1", "expense", -12.5, mid_january()))
        .await
        .unwrap();
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(12_50));
}

#[tokio::test]
async fn income_reduces_spent_and_floors_at_zero() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::new(30_00),
    )
    .await;
    let worker = worker(&db);

    worker
        .process_event(&event("refund-1", "income", 10.0, mid_january()))
        .await
        .unwrap();
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(20_00));

    worker
        .process_event(&event("refund-2", "income", 25.0, mid_january()))
        .await
        .unwrap();
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::ZERO);
}

#[tokio::test]
async fn window_is_inclusive_to_the_microsecond() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::ZERO,
    )
    .await;
    let worker = worker(&db);
    let one = TimeDelta::microseconds(1);

    let cases = [
        ("at-start", groceries.period_start, 1),
        ("at-end", groceries.period_end, 1),
        ("before-start", groceries.period_start - one, 0),
        ("after-end", groceries.period_end + one, 0),
    ];
    for (id, at, matched) in cases {
        assert_eq!(
            worker
                .process_event(&event(id, "expense", 1.0, at))
                .await
                .unwrap(),
            Outcome::Applied { budgets: matched },
            "{id}"
        );
    }
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(2_00));
}

#[tokio::test]
async fn other_users_and_categories_are_untouched() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let bobs = seed_budget(&budgets, "bob", "groceries", BudgetPeriod::Monthly, MoneyCents::ZERO)
        .await;
    let rent = seed_budget(&budgets, "alice", "rent", BudgetPeriod::Monthly, MoneyCents::ZERO)
        .await;

    let outcome = worker(&db)
        .process_event(&event("tx-1", "expense", 25.0, mid_january()))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Applied { budgets: 0 });
    assert_eq!(spent_of(&budgets, &bobs).await, MoneyCents::ZERO);
    assert_eq!(spent_of(&budgets, &rent).await, MoneyCents::ZERO);
}

#[tokio::test]
async fn overlapping_budgets_all_receive_the_delta() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let monthly = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::new(10_00),
    )
    .await;
    let yearly = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Yearly,
        MoneyCents::new(100_00),
    )
    .await;

    let outcome = worker(&db)
        .process_event(&event("tx-1", "expense", 5.5, mid_january()))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Applied { budgets: 2 });
    assert_eq!(spent_of(&budgets, &monthly).await, MoneyCents::new(15_50));
    assert_eq!(spent_of(&budgets, &yearly).await, MoneyCents::new(105_50));
}

#[tokio::test]
async fn unknown_type_is_marked_without_touching_budgets() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let markers = DbMarkerStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::new(40_00),
    )
    .await;
    let worker = worker(&db);

    let transfer = event("tx-transfer", "transfer", 25.0, mid_january());
    assert_eq!(
        worker.process_event(&transfer).await.unwrap(),
        Outcome::IgnoredKind
    );
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(40_00));
    assert_eq!(
        markers.get("tx-transfer").await.unwrap().unwrap().kind,
        "transfer"
    );

    assert_eq!(
        worker.process_event(&transfer).await.unwrap(),
        Outcome::Duplicate
    );
}

#[tokio::test]
async fn zero_amount_is_marked_without_touching_budgets() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let markers = DbMarkerStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::new(40_00),
    )
    .await;

    let outcome = worker(&db)
        .process_event(&event("tx-zero", "expense", 0.001, mid_january()))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::ZeroDelta);
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(40_00));
    assert!(markers.get("tx-zero").await.unwrap().is_some());
}

#[tokio::test]
async fn malformed_messages_are_never_marked() {
    let db = database().await;
    let markers = DbMarkerStore::new(db.clone());
    let worker = worker(&db);

    let err = worker.process_message("{\"transactionId\":").await.unwrap_err();
    assert!(matches!(err, WorkerError::Malformed(_)));
    assert!(!err.is_retryable());

    let mut missing_user = event("tx-1", "expense", 1.0, mid_january());
    missing_user.user_id = String::new();
    let err = worker.process_event(&missing_user).await.unwrap_err();
    assert!(matches!(err, WorkerError::Malformed(_)));

    let mut huge = event("tx-2", "expense", 1.0, mid_january());
    huge.amount = 1e300;
    let err = worker.process_event(&huge).await.unwrap_err();
    assert!(matches!(err, WorkerError::Malformed(_)));

    assert!(markers.get("tx-1").await.unwrap().is_none());
    assert!(markers.get("tx-2").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_type_is_marked_even_with_an_unusable_amount() {
    let db = database().await;
    let markers = DbMarkerStore::new(db.clone());
    let worker = worker(&db);

    let transfer = event("tx-transfer", "transfer", 1e300, mid_january());
    assert_eq!(
        worker.process_event(&transfer).await.unwrap(),
        Outcome::IgnoredKind
    );
    assert!(markers.get("tx-transfer").await.unwrap().is_some());

    assert_eq!(
        worker.process_event(&transfer).await.unwrap(),
        Outcome::Duplicate
    );
}

#[tokio::test]
async fn huge_expenses_saturate_instead_of_failing_forever() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::ZERO,
    )
    .await;
    let worker = worker(&db);

    for (id, amount) in [("tx-1", 5e16), ("tx-2", 5e16), ("tx-3", 1.0)] {
        let outcome = worker
            .process_event(&event(id, "expense", amount, mid_january()))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Applied { budgets: 1 });
    }
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(i64::MAX));

    let outcome = worker
        .process_event(&event("tx-4", "income", 1.0, mid_january()))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Applied { budgets: 1 });
    assert_eq!(
        spent_of(&budgets, &groceries).await,
        MoneyCents::new(i64::MAX - 1_00)
    );
}

#[tokio::test]
async fn failed_lookup_removes_marker_and_retry_succeeds() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let markers = DbMarkerStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::new(40_00),
    )
    .await;
    let flaky = Arc::new(FlakyBudgets::new(&db));
    flaky.fail_find.store(true, Ordering::SeqCst);
    let worker = BudgetWorker::builder()
        .budget_store(flaky.clone())
        .marker_store(Arc::new(markers.clone()))
        .build()
        .unwrap();
    let expense = event("tx-1", "expense", 25.0, mid_january());

    let err = worker.process_event(&expense).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(markers.get("tx-1").await.unwrap().is_none());

    flaky.heal();
    assert_eq!(
        worker.process_event(&expense).await.unwrap(),
        Outcome::Applied { budgets: 1 }
    );
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(65_00));
}

#[tokio::test]
async fn failed_update_removes_marker() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let markers = DbMarkerStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::new(40_00),
    )
    .await;
    let flaky = Arc::new(FlakyBudgets::new(&db));
    flaky.fail_apply_at.store(1, Ordering::SeqCst);
    let worker = BudgetWorker::builder()
        .budget_store(flaky.clone())
        .marker_store(Arc::new(markers.clone()))
        .build()
        .unwrap();

    let err = worker
        .process_event(&event("tx-1", "expense", 25.0, mid_january()))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Store(EngineError::Database(_))));
    assert!(markers.get("tx-1").await.unwrap().is_none());
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(40_00));
}

#[tokio::test]
async fn failed_compensation_still_reports_the_store_error() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    seed_budget(&budgets, "alice", "groceries", BudgetPeriod::Monthly, MoneyCents::ZERO).await;
    let flaky = Arc::new(FlakyBudgets::new(&db));
    flaky.fail_find.store(true, Ordering::SeqCst);
    let worker = BudgetWorker::builder()
        .budget_store(flaky)
        .marker_store(Arc::new(StickyMarkers {
            inner: DbMarkerStore::new(db.clone()),
        }))
        .build()
        .unwrap();

    let err = worker
        .process_event(&event("tx-1", "expense", 25.0, mid_january()))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

// Known gap: budgets updated before the failing one keep their increment,
// and the retry applies it to them a second time.
#[tokio::test]
async fn partial_failure_double_applies_on_retry() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let monthly = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::ZERO,
    )
    .await;
    let yearly = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Yearly,
        MoneyCents::ZERO,
    )
    .await;
    let flaky = Arc::new(FlakyBudgets::new(&db));
    flaky.fail_apply_at.store(2, Ordering::SeqCst);
    let worker = BudgetWorker::builder()
        .budget_store(flaky.clone())
        .marker_store(Arc::new(DbMarkerStore::new(db.clone())))
        .build()
        .unwrap();
    let expense = event("tx-1", "expense", 25.0, mid_january());

    assert!(worker.process_event(&expense).await.is_err());
    let mut after_failure = [
        spent_of(&budgets, &monthly).await.cents(),
        spent_of(&budgets, &yearly).await.cents(),
    ];
    after_failure.sort_unstable();
    assert_eq!(after_failure, [0, 25_00]);

    flaky.heal();
    assert_eq!(
        worker.process_event(&expense).await.unwrap(),
        Outcome::Applied { budgets: 2 }
    );
    let mut after_retry = [
        spent_of(&budgets, &monthly).await.cents(),
        spent_of(&budgets, &yearly).await.cents(),
    ];
    after_retry.sort_unstable();
    assert_eq!(after_retry, [25_00, 50_00]);
}

#[tokio::test]
async fn concurrent_redeliveries_apply_once() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::ZERO,
    )
    .await;
    let worker = Arc::new(worker(&db));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let worker = Arc::clone(&worker);
        tasks.spawn(async move {
            worker
                .process_event(&event("tx-1", "expense", 25.0, mid_january()))
                .await
                .unwrap()
        });
    }

    let mut applied = 0;
    while let Some(outcome) = tasks.join_next().await {
        match outcome.unwrap() {
            Outcome::Applied { .. } => applied += 1,
            Outcome::Duplicate => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(25_00));
}

#[tokio::test]
async fn concurrent_distinct_events_do_not_lose_updates() {
    let db = database().await;
    let budgets = DbBudgetStore::new(db.clone());
    let groceries = seed_budget(
        &budgets,
        "alice",
        "groceries",
        BudgetPeriod::Monthly,
        MoneyCents::ZERO,
    )
    .await;
    let worker = Arc::new(worker(&db));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..10 {
        let worker = Arc::clone(&worker);
        tasks.spawn(async move {
            worker
                .process_event(&event(&format!("tx-{i}"), "expense", 1.0, mid_january()))
                .await
                .unwrap()
        });
    }
    while let Some(outcome) = tasks.join_next().await {
        assert_eq!(outcome.unwrap(), Outcome::Applied { budgets: 1 });
    }

    assert_eq!(spent_of(&budgets, &groceries).await, MoneyCents::new(10_00));
}
