//! Transaction kinds as seen by the budget worker.

use api_types::event;

use crate::MoneyCents;

/// Kind of a recorded transaction.
///
/// Only expenses and incomes move budgets; every other type (transfers,
/// adjustments, whatever the producer adds later) is carried through as
/// `Other` so it can be logged and marked processed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Expense,
    Income,
    Other(String),
}

impl TransactionKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Expense => event::EXPENSE,
            Self::Income => event::INCOME,
            Self::Other(raw) => raw,
        }
    }

    /// Signed change to a budget's `spent` total for a transaction of this
    /// kind and the given amount. Only the magnitude of `amount` is used.
    ///
    /// Returns `None` for kinds that never affect budgets.
    pub fn spend_delta(&self, amount: MoneyCents) -> Option<MoneyCents> {
        let magnitude = amount.abs();
        match self {
            Self::Expense => Some(magnitude),
            Self::Income => Some(-magnitude),
            Self::Other(_) => None,
        }
    }
}

impl From<&str> for TransactionKind {
    fn from(value: &str) -> Self {
        match value {
            event::EXPENSE => Self::Expense,
            event::INCOME => Self::Income,
            other => Self::Other(other.to_string()),
        }
    }
}
