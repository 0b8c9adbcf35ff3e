//! Alert sinks for transactions classified as fraudulent
//!
//! Delivery is fire-and-forget from the loop's point of view: the caller
//! bounds `notify` with a timeout and only logs failures.

pub mod nats;
pub mod webhook;

use crate::error::PipelineResult;
use crate::types::alert::{FraudAlert, RiskLevelThresholds};
use crate::types::scored::ScoredTransaction;
use async_trait::async_trait;
use tracing::warn;

pub use nats::NatsAlertSink;
pub use webhook::WebhookAlertSink;

/// One-way notification channel
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver an alert for an already persisted fraud decision
    async fn notify(&self, scored: &ScoredTransaction) -> PipelineResult<()>;

    /// Transport name for logs
    fn transport(&self) -> &'static str;
}

/// Writes the alert as a structured warning
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink {
    risk_levels: RiskLevelThresholds,
}

impl LogAlertSink {
    pub fn new(risk_levels: RiskLevelThresholds) -> Self {
        Self { risk_levels }
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, scored: &ScoredTransaction) -> PipelineResult<()> {
        let alert = FraudAlert::from_scored(scored, &self.risk_levels);

        warn!(
            alert_id = %alert.alert_id,
            transaction_id = %alert.transaction_id,
            amount = alert.amount,
            category = %alert.category,
            merchant = %alert.merchant,
            fraud_probability = alert.fraud_probability,
            risk_level = alert.risk_level.as_str(),
            transaction_time = %alert.transaction_time,
            "FRAUD ALERT"
        );
        Ok(())
    }

    fn transport(&self) -> &'static str {
        "log"
    }
}
