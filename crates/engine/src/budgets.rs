//! The module contains `Budget` struct and its implementation.

use chrono::{DateTime, Months, TimeDelta, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Currency, EngineError, MoneyCents, ResultEngine};

/// Length of a budget window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Monthly,
    Quarterly,
    Yearly,
}

impl BudgetPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
            Self::Yearly => 12,
        }
    }

    /// Returns the inclusive end of a window of this kind opening at `start`:
    /// the last microsecond before the next period begins.
    pub fn window_starting(self, start: DateTime<Utc>) -> ResultEngine<DateTime<Utc>> {
        start
            .checked_add_months(Months::new(self.months()))
            .map(|next| next - TimeDelta::microseconds(1))
            .ok_or_else(|| EngineError::InvalidPeriod(format!("{start} is out of range")))
    }
}

impl TryFrom<&str> for BudgetPeriod {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            other => Err(EngineError::InvalidPeriod(format!(
                "invalid budget period: {other}"
            ))),
        }
    }
}

/// A spending limit for one category over one time window.
///
/// Several budgets of the same user and category may overlap (for example a
/// monthly and a yearly one); an expense counts against all of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Budget {
    pub id: Uuid,
    pub user_id: String,
    pub category_id: String,
    pub limit: MoneyCents,
    pub currency: Currency,
    pub period: BudgetPeriod,
    /// Inclusive.
    pub period_start: DateTime<Utc>,
    /// Inclusive.
    pub period_end: DateTime<Utc>,
    /// Cumulative spending, never negative.
    pub spent: MoneyCents,
    /// Percentage of `limit` at which the budget is considered in alert.
    pub alert_percent: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Budget {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        category_id: String,
        limit: MoneyCents,
        currency: Currency,
        period: BudgetPeriod,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        alert_percent: u8,
    ) -> ResultEngine<Self> {
        if limit.is_negative() {
            return Err(EngineError::InvalidAmount(
                "budget limit must be >= 0".to_string(),
            ));
        }
        validate_alert_percent(alert_percent)?;
        validate_window(period_start, period_end)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            category_id,
            limit,
            currency,
            period,
            period_start,
            period_end,
            spent: MoneyCents::ZERO,
            alert_percent,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether `spent` has reached `alert_percent` of `limit`.
    pub fn alert_reached(&self) -> bool {
        if self.limit.is_zero() {
            return false;
        }
        i128::from(self.spent.cents()) * 100
            >= i128::from(self.limit.cents()) * i128::from(self.alert_percent)
    }
}

pub(crate) fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> ResultEngine<()> {
    if start > end {
        return Err(EngineError::InvalidPeriod(format!(
            "period start {start} is after period end {end}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_alert_percent(alert_percent: u8) -> ResultEngine<()> {
    if alert_percent > 100 {
        return Err(EngineError::InvalidAmount(format!(
            "alert percent must be within 0..=100, got {alert_percent}"
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "budgets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub category_id: String,
    pub limit_minor: i64,
    pub currency: String,
    pub period: String,
    pub period_start: DateTimeUtc,
    pub period_end: DateTimeUtc,
    pub spent_minor: i64,
    pub alert_percent: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Budget> for ActiveModel {
    fn from(value: &Budget) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            user_id: ActiveValue::Set(value.user_id.clone()),
            category_id: ActiveValue::Set(value.category_id.clone()),
            limit_minor: ActiveValue::Set(value.limit.cents()),
            currency: ActiveValue::Set(value.currency.code().to_string()),
            period: ActiveValue::Set(value.period.as_str().to_string()),
            period_start: ActiveValue::Set(value.period_start),
            period_end: ActiveValue::Set(value.period_end),
            spent_minor: ActiveValue::Set(value.spent.cents()),
            alert_percent: ActiveValue::Set(i32::from(value.alert_percent)),
            created_at: ActiveValue::Set(value.created_at),
            updated_at: ActiveValue::Set(value.updated_at),
        }
    }
}

impl TryFrom<Model> for Budget {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&model.id)
            .map_err(|_| EngineError::KeyNotFound(format!("invalid budget id: {}", model.id)))?;
        let alert_percent = u8::try_from(model.alert_percent).map_err(|_| {
            EngineError::InvalidAmount(format!("invalid alert percent: {}", model.alert_percent))
        })?;

        Ok(Self {
            id,
            user_id: model.user_id,
            category_id: model.category_id,
            limit: MoneyCents::new(model.limit_minor),
            currency: Currency::try_from(model.currency.as_str())?,
            period: BudgetPeriod::try_from(model.period.as_str())?,
            period_start: model.period_start,
            period_end: model.period_end,
            spent: MoneyCents::new(model.spent_minor),
            alert_percent,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
