use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
    sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    Budget, EngineError, MoneyCents, ResultEngine,
    budgets::{self, validate_alert_percent, validate_window},
};

use super::BudgetStore;

/// `BudgetStore` backed by the `budgets` table.
#[derive(Clone, Debug)]
pub struct DbBudgetStore {
    database: DatabaseConnection,
}

impl DbBudgetStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

fn not_found(id: Uuid) -> EngineError {
    EngineError::KeyNotFound(format!("budget {id}"))
}

fn into_budgets(models: Vec<budgets::Model>) -> ResultEngine<Vec<Budget>> {
    models.into_iter().map(Budget::try_from).collect()
}

#[async_trait]
impl BudgetStore for DbBudgetStore {
    async fn create(&self, budget: &Budget) -> ResultEngine<()> {
        validate_window(budget.period_start, budget.period_end)?;
        validate_alert_percent(budget.alert_percent)?;
        budgets::ActiveModel::from(budget)
            .insert(&self.database)
            .await?;
        Ok(())
    }

    async fn update(&self, budget: &Budget) -> ResultEngine<()> {
        validate_window(budget.period_start, budget.period_end)?;
        validate_alert_percent(budget.alert_percent)?;

        let result = budgets::Entity::update_many()
            .col_expr(budgets::Column::LimitMinor, Expr::value(budget.limit.cents()))
            .col_expr(budgets::Column::Currency, Expr::value(budget.currency.code()))
            .col_expr(budgets::Column::Period, Expr::value(budget.period.as_str()))
            .col_expr(budgets::Column::PeriodStart, Expr::value(budget.period_start))
            .col_expr(budgets::Column::PeriodEnd, Expr::value(budget.period_end))
            .col_expr(
                budgets::Column::AlertPercent,
                Expr::value(i32::from(budget.alert_percent)),
            )
            .col_expr(budgets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(budgets::Column::Id.eq(budget.id.to_string()))
            .filter(budgets::Column::UserId.eq(budget.user_id.clone()))
            .exec(&self.database)
            .await?;

        if result.rows_affected == 0 {
            return Err(not_found(budget.id));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid, user_id: &str) -> ResultEngine<Option<Budget>> {
        budgets::Entity::find_by_id(id.to_string())
            .filter(budgets::Column::UserId.eq(user_id))
            .one(&self.database)
            .await?
            .map(Budget::try_from)
            .transpose()
    }

    async fn list(&self, user_id: &str, limit: u64, offset: u64) -> ResultEngine<Vec<Budget>> {
        let models = budgets::Entity::find()
            .filter(budgets::Column::UserId.eq(user_id))
            .order_by_asc(budgets::Column::PeriodStart)
            .order_by_asc(budgets::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(&self.database)
            .await?;
        into_budgets(models)
    }

    async fn update_spent(&self, id: Uuid, user_id: &str, spent: MoneyCents) -> ResultEngine<()> {
        if spent.is_negative() {
            return Err(EngineError::InvalidAmount(
                "spent must be >= 0".to_string(),
            ));
        }

        let result = budgets::Entity::update_many()
            .col_expr(budgets::Column::SpentMinor, Expr::value(spent.cents()))
            .col_expr(budgets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(budgets::Column::Id.eq(id.to_string()))
            .filter(budgets::Column::UserId.eq(user_id))
            .exec(&self.database)
            .await?;

        if result.rows_affected == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn apply_spent_delta(
        &self,
        id: Uuid,
        user_id: &str,
        delta: MoneyCents,
    ) -> ResultEngine<Budget> {
        let db_tx = self.database.begin().await?;

        // Totals saturate at i64::MAX: sqlite silently turns an overflowing
        // integer sum into a REAL, which the entity can no longer decode.
        let headroom = i64::MAX - delta.cents().max(0);

        // Single statement, so concurrent deltas on the same budget serialize
        // in the database instead of racing in a read-modify-write.
        let result = budgets::Entity::update_many()
            .col_expr(
                budgets::Column::SpentMinor,
                Expr::cust_with_values(
                    "CASE WHEN spent_minor > ? THEN ? \
                     WHEN spent_minor + ? < 0 THEN 0 \
                     ELSE spent_minor + ? END",
                    [headroom, i64::MAX, delta.cents(), delta.cents()],
                ),
            )
            .col_expr(budgets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(budgets::Column::Id.eq(id.to_string()))
            .filter(budgets::Column::UserId.eq(user_id))
            .exec(&db_tx)
            .await?;

        if result.rows_affected == 0 {
            return Err(not_found(id));
        }

        let updated = budgets::Entity::find_by_id(id.to_string())
            .one(&db_tx)
            .await?
            .ok_or_else(|| not_found(id))?;

        db_tx.commit().await?;
        Budget::try_from(updated)
    }

    async fn find_active_by_category(
        &self,
        user_id: &str,
        category_id: &str,
        at: DateTime<Utc>,
    ) -> ResultEngine<Vec<Budget>> {
        let models = budgets::Entity::find()
            .filter(budgets::Column::UserId.eq(user_id))
            .filter(budgets::Column::CategoryId.eq(category_id))
            .filter(budgets::Column::PeriodStart.lte(at))
            .filter(budgets::Column::PeriodEnd.gte(at))
            .order_by_asc(budgets::Column::Id)
            .all(&self.database)
            .await?;
        into_budgets(models)
    }
}
