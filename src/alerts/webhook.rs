//! Chat webhook (Slack-compatible) alert transport

use crate::alerts::AlertSink;
use crate::error::{PipelineError, PipelineResult};
use crate::types::alert::{FraudAlert, RiskLevelThresholds};
use crate::types::scored::ScoredTransaction;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// POSTs a `{"text": ..., "alert": {...}}` message to an incoming-webhook URL
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
    risk_levels: RiskLevelThresholds,
}

impl WebhookAlertSink {
    pub fn new(url: &str, timeout: Duration, risk_levels: RiskLevelThresholds) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.to_string(),
            risk_levels,
        })
    }
}

fn webhook_payload(alert: &FraudAlert) -> Value {
    json!({
        "text": alert.headline(),
        "alert": alert,
    })
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn notify(&self, scored: &ScoredTransaction) -> PipelineResult<()> {
        let alert = FraudAlert::from_scored(scored, &self.risk_levels);

        let response = self
            .client
            .post(&self.url)
            .json(&webhook_payload(&alert))
            .send()
            .await
            .map_err(|e| PipelineError::AlertDelivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::AlertDelivery(format!(
                "webhook answered {status}"
            )));
        }

        debug!(alert_id = %alert.alert_id, transaction_id = %alert.transaction_id, "Webhook alert delivered");
        Ok(())
    }

    fn transport(&self) -> &'static str {
        "webhook"
    }
}
