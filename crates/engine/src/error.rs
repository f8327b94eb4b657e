//! The module contains the error the engine can throw.
//!
//! The errors are:
//!
//! - [`KeyNotFound`] thrown when a budget (or another keyed item) is not found
//!   for the requesting user.
//! - [`InvalidPeriod`] thrown when a budget window is inverted.
//! - [`Database`] for any failure of the underlying store. The budget worker
//!   treats it as transient.
//!
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`InvalidPeriod`]: EngineError::InvalidPeriod
//!  [`Database`]: EngineError::Database
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),
    #[error("Queue error: {0}")]
    Queue(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Missing dependency: {0}")]
    MissingDependency(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidPeriod(a), Self::InvalidPeriod(b)) => a == b,
            (Self::CurrencyMismatch(a), Self::CurrencyMismatch(b)) => a == b,
            (Self::Queue(a), Self::Queue(b)) => a == b,
            (Self::Serialization(a), Self::Serialization(b)) => a == b,
            (Self::MissingDependency(a), Self::MissingDependency(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
