//! In-process result store

use crate::error::PipelineResult;
use crate::store::{FraudSummary, PutOutcome, ReportWindow, ResultStore};
use crate::types::scored::ScoredTransaction;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// First-write-wins map keyed by transaction identifier.
///
/// Used for tests and store-less dry runs; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    rows: DashMap<String, ScoredTransaction>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn ensure_schema(&self) -> PipelineResult<()> {
        Ok(())
    }

    async fn put(&self, scored: &ScoredTransaction) -> PipelineResult<PutOutcome> {
        match self.rows.entry(scored.transaction_id().to_string()) {
            Entry::Occupied(_) => Ok(PutOutcome::AlreadyPresent),
            Entry::Vacant(slot) => {
                slot.insert(scored.clone());
                Ok(PutOutcome::Inserted)
            }
        }
    }

    async fn get(&self, transaction_id: &str) -> PipelineResult<Option<ScoredTransaction>> {
        Ok(self.rows.get(transaction_id).map(|row| row.value().clone()))
    }

    async fn summary(&self, window: ReportWindow) -> PipelineResult<FraudSummary> {
        let mut summary = FraudSummary::default();
        let mut probability_sum = 0.0;

        for row in self.rows.iter() {
            let scored = row.value();
            if !window.contains(scored.transaction.timestamp) {
                continue;
            }
            let amount = scored.transaction.amount;

            summary.total_transactions += 1;
            summary.total_amount += amount;
            probability_sum += scored.fraud_probability;
            summary.max_fraud_probability = summary.max_fraud_probability.max(scored.fraud_probability);

            if scored.predicted_fraud {
                summary.fraud_count += 1;
                summary.fraud_amount += amount;
            } else {
                summary.legitimate_count += 1;
            }
        }

        if summary.total_transactions > 0 {
            let n = summary.total_transactions as f64;
            summary.avg_fraud_probability = probability_sum / n;
            summary.avg_amount = summary.total_amount / n;
        }

        Ok(summary)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::scored::Threshold;
    use crate::types::transaction::Transaction;
    use chrono::NaiveDate;

    fn scored(id: &str, day: u32, amount: f64, probability: f64) -> ScoredTransaction {
        let ts = NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        ScoredTransaction::new(
            Transaction::new(id, ts, amount, "shopping_net"),
            probability,
            Threshold::default(),
        )
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryResultStore::new();
        let first = scored("T1", 5, 500.0, 0.87);

        assert_eq!(store.put(&first).await.unwrap(), PutOutcome::Inserted);
        assert_eq!(store.put(&first).await.unwrap(), PutOutcome::AlreadyPresent);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_first_write_is_authoritative() {
        let store = MemoryResultStore::new();
        store.put(&scored("T1", 5, 500.0, 0.87)).await.unwrap();

        let outcome = store.put(&scored("T1", 5, 500.0, 0.10)).await.unwrap();
        assert_eq!(outcome, PutOutcome::AlreadyPresent);

        let stored = store.get("T1").await.unwrap().unwrap();
        assert_eq!(stored.fraud_probability, 0.87);
        assert!(stored.predicted_fraud);
        assert!(store.get("T2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summary_respects_window() {
        let store = MemoryResultStore::new();
        store.put(&scored("A", 5, 100.0, 0.9)).await.unwrap();
        store.put(&scored("B", 5, 50.0, 0.1)).await.unwrap();
        store.put(&scored("C", 5, 30.0, 0.3)).await.unwrap();
        store.put(&scored("D", 6, 999.0, 0.99)).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let summary = store.summary(ReportWindow::for_day(day)).await.unwrap();

        assert_eq!(summary.total_transactions, 3);
        assert_eq!(summary.fraud_count, 1);
        assert_eq!(summary.legitimate_count, 2);
        assert_eq!(summary.total_amount, 180.0);
        assert_eq!(summary.avg_amount, 60.0);
        assert_eq!(summary.fraud_amount, 100.0);
        assert_eq!(summary.max_fraud_probability, 0.9);
        assert!((summary.avg_fraud_probability - 1.3 / 3.0).abs() < 1e-12);
    }
}
