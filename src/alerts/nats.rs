//! NATS publisher for fraud alerts

use crate::alerts::AlertSink;
use crate::error::{PipelineError, PipelineResult};
use crate::types::alert::{FraudAlert, RiskLevelThresholds};
use crate::types::scored::ScoredTransaction;
use async_nats::Client;
use async_trait::async_trait;
use tracing::{debug, info};

/// Publishes JSON `FraudAlert`s to a NATS subject
#[derive(Clone)]
pub struct NatsAlertSink {
    client: Client,
    subject: String,
    risk_levels: RiskLevelThresholds,
}

impl NatsAlertSink {
    /// Create a sink over an existing connection
    pub fn new(client: Client, subject: &str, risk_levels: RiskLevelThresholds) -> Self {
        Self {
            client,
            subject: subject.to_string(),
            risk_levels,
        }
    }

    /// Connect to the server and create a sink
    pub async fn connect(url: &str, subject: &str, risk_levels: RiskLevelThresholds) -> PipelineResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| PipelineError::AlertDelivery(format!("cannot connect to NATS at {url}: {e}")))?;
        info!(url = %url, subject = %subject, "Connected to NATS for alerts");
        Ok(Self::new(client, subject, risk_levels))
    }
}

#[async_trait]
impl AlertSink for NatsAlertSink {
    async fn notify(&self, scored: &ScoredTransaction) -> PipelineResult<()> {
        let alert = FraudAlert::from_scored(scored, &self.risk_levels);
        let payload = serde_json::to_vec(&alert)
            .map_err(|e| PipelineError::AlertDelivery(format!("cannot encode alert: {e}")))?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| PipelineError::AlertDelivery(e.to_string()))?;

        // publish only buffers; flush so a dead connection surfaces here
        self.client
            .flush()
            .await
            .map_err(|e| PipelineError::AlertDelivery(e.to_string()))?;

        debug!(
            alert_id = %alert.alert_id,
            transaction_id = %alert.transaction_id,
            fraud_probability = alert.fraud_probability,
            subject = %self.subject,
            "Published fraud alert"
        );

        Ok(())
    }

    fn transport(&self) -> &'static str {
        "nats"
    }
}

