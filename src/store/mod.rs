//! Durable, idempotent persistence of scored transactions
//!
//! The transaction identifier is the key. The first recorded score for an
//! identifier is authoritative: later writes for the same key are no-ops.

pub mod memory;
pub mod postgres;

use crate::error::PipelineResult;
use crate::types::scored::ScoredTransaction;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

pub use memory::MemoryResultStore;
pub use postgres::PgResultStore;

/// Result of an idempotent write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    AlreadyPresent,
}

/// Half-open `[start, end)` range over transaction wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ReportWindow {
    /// The whole calendar day `date`
    pub fn for_day(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN);
        Self {
            start,
            end: start + chrono::Duration::days(1),
        }
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Aggregates over a report window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FraudSummary {
    pub total_transactions: u64,
    pub fraud_count: u64,
    pub legitimate_count: u64,
    pub avg_fraud_probability: f64,
    pub max_fraud_probability: f64,
    pub total_amount: f64,
    pub avg_amount: f64,
    pub fraud_amount: f64,
}

impl FraudSummary {
    /// Fraud share in percent
    pub fn fraud_rate(&self) -> f64 {
        if self.total_transactions == 0 {
            0.0
        } else {
            self.fraud_count as f64 / self.total_transactions as f64 * 100.0
        }
    }
}

/// Storage backend for scored transactions
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create the backing table if it does not exist
    async fn ensure_schema(&self) -> PipelineResult<()>;

    /// Insert unless the identifier is already stored
    async fn put(&self, scored: &ScoredTransaction) -> PipelineResult<PutOutcome>;

    /// Point lookup by transaction identifier
    async fn get(&self, transaction_id: &str) -> PipelineResult<Option<ScoredTransaction>>;

    /// Aggregate read for reporting
    async fn summary(&self, window: ReportWindow) -> PipelineResult<FraudSummary>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_window_is_half_open() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let window = ReportWindow::for_day(day);

        assert!(window.contains(day.and_hms_opt(0, 0, 0).unwrap()));
        assert!(window.contains(day.and_hms_opt(23, 59, 59).unwrap()));
        assert!(!window.contains(
            NaiveDate::from_ymd_opt(2024, 3, 6)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        ));
    }

    #[test]
    fn test_fraud_rate() {
        let summary = FraudSummary {
            total_transactions: 8,
            fraud_count: 2,
            ..Default::default()
        };
        assert_eq!(summary.fraud_rate(), 25.0);
        assert_eq!(FraudSummary::default().fraud_rate(), 0.0);
    }
}
