//! Scored transactions and the fraud decision rule

use crate::error::{PipelineError, PipelineResult};
use crate::types::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// Default probability cutoff for flagging fraud
pub const DEFAULT_THRESHOLD: f64 = 0.4;

/// Probability cutoff. Construction guarantees it lies in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold(f64);

impl Threshold {
    pub fn new(value: f64) -> PipelineResult<Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(PipelineError::Config(format!(
                "threshold must lie in [0, 1], got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Inclusive: a probability exactly at the threshold is flagged.
    pub fn is_fraud(&self, probability: f64) -> bool {
        probability >= self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

/// A transaction together with its model output and decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    /// Fraud probability in `[0, 1]`
    pub fraud_probability: f64,
    /// `fraud_probability >= threshold`
    pub predicted_fraud: bool,
}

impl ScoredTransaction {
    pub fn new(transaction: Transaction, probability: f64, threshold: Threshold) -> Self {
        Self {
            predicted_fraud: threshold.is_fraud(probability),
            fraud_probability: probability,
            transaction,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction.transaction_id
    }
}
