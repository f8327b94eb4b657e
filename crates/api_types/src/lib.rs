use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod event {
    use super::*;

    /// Raw `type` values the producer emits for budget-relevant transactions.
    pub const EXPENSE: &str = "expense";
    pub const INCOME: &str = "income";

    /// Message published after a transaction has been persisted and the
    /// account balance adjusted.
    ///
    /// Field names are fixed by the producer, so the JSON shape is camelCase.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TransactionRecorded {
        pub transaction_id: String,
        pub user_id: String,
        pub account_id: String,
        pub category_id: String,
        /// Amount in major units. Producers may send it signed or unsigned;
        /// consumers only look at the magnitude.
        pub amount: f64,
        pub currency: String,
        /// RFC3339 timestamp.
        pub occurred_at: DateTime<Utc>,
        /// `"expense"`, `"income"` or any other transaction type.
        #[serde(rename = "type")]
        pub kind: String,
    }
}

pub mod batch {
    use super::*;

    /// Batch of queue records delivered by the push-mode invoker.
    ///
    /// Mirrors the envelope of a managed queue trigger: `{"Records": [...]}`.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct QueueBatch {
        #[serde(rename = "Records", default)]
        pub records: Vec<QueueRecord>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct QueueRecord {
        pub message_id: String,
        /// JSON-encoded `TransactionRecorded`.
        pub body: String,
    }

    /// Per-batch counters returned to the invoker.
    ///
    /// The invoker only cares about the status code; the counters are there
    /// for operators replaying batches by hand.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BatchSummary {
        pub received: usize,
        pub processed: usize,
        pub duplicates: usize,
        pub ignored: usize,
        pub discarded: usize,
        pub failed: usize,
    }
}
