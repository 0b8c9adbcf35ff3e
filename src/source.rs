//! Client for the upstream transaction source

use crate::config::SourceConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::transaction::RawRecord;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Liveness report from the source's health endpoint
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SourceHealth {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub transactions_available: Option<u64>,
}

impl SourceHealth {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
            && self.transactions_available.map_or(true, |n| n > 0)
    }
}

/// Request/response source yielding one transaction record per call
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Fetch the next transaction as a flat field mapping
    async fn fetch(&self) -> PipelineResult<RawRecord>;

    /// Query the separate liveness endpoint
    async fn health(&self) -> PipelineResult<SourceHealth>;
}

/// HTTP source: `GET transaction_url` returns one JSON object
pub struct HttpTransactionSource {
    client: reqwest::Client,
    transaction_url: String,
    health_url: String,
}

impl HttpTransactionSource {
    /// Create a new source client; every request is bounded by `fetch_timeout_ms`
    pub fn new(config: &SourceConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .build()
            .map_err(|e| PipelineError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            transaction_url: config.transaction_url.clone(),
            health_url: config.health_url.clone(),
        })
    }

    pub fn transaction_url(&self) -> &str {
        &self.transaction_url
    }

    async fn get_json(&self, url: &str) -> PipelineResult<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(network_error)?
            .error_for_status()
            .map_err(network_error)?;

        // A body that arrives but is not JSON is the source's fault, not the network's.
        let bytes = response.bytes().await.map_err(network_error)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| PipelineError::malformed(None, format!("response is not JSON: {e}")))
    }
}

#[async_trait]
impl TransactionSource for HttpTransactionSource {
    async fn fetch(&self) -> PipelineResult<RawRecord> {
        let body = self.get_json(&self.transaction_url).await?;
        let record = into_record(body)?;
        debug!(fields = record.len(), "Fetched transaction record");
        Ok(record)
    }

    async fn health(&self) -> PipelineResult<SourceHealth> {
        let body = self.get_json(&self.health_url).await?;
        serde_json::from_value(body)
            .map_err(|e| PipelineError::malformed(None, format!("unexpected health payload: {e}")))
    }
}

/// The source must answer with a JSON object; an `error` field means it has nothing to serve.
fn into_record(body: Value) -> PipelineResult<RawRecord> {
    match body {
        Value::Object(map) if map.contains_key("error") && !map.contains_key("trans_num") => {
            let message = map
                .get("message")
                .or_else(|| map.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("source reported an error");
            Err(PipelineError::TransientNetwork(format!("source error: {message}")))
        }
        Value::Object(map) => Ok(map),
        other => Err(PipelineError::malformed(
            None,
            format!("expected a JSON object, got {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn network_error(e: reqwest::Error) -> PipelineError {
    if e.is_timeout() {
        PipelineError::TransientNetwork(format!("request timed out: {e}"))
    } else {
        PipelineError::TransientNetwork(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_body_is_record() {
        let record = into_record(json!({"trans_num": "T1", "amt": 500.0})).unwrap();
        assert_eq!(record.get("trans_num"), Some(&json!("T1")));
    }

    #[test]
    fn test_non_object_body_is_malformed() {
        let err = into_record(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput { .. }));
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_error_body_is_transient() {
        let err = into_record(json!({
            "error": "Test data not loaded",
            "message": "Run prepare_api_data.py first"
        }))
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_health_parsing() {
        let health: SourceHealth = serde_json::from_value(json!({
            "status": "healthy",
            "timestamp": "2024-03-05T10:00:00",
            "transactions_available": 444859
        }))
        .unwrap();
        assert!(health.is_healthy());

        let empty = SourceHealth {
            status: "healthy".to_string(),
            timestamp: None,
            transactions_available: Some(0),
        };
        assert!(!empty.is_healthy());
    }

    #[test]
    fn test_client_builds_from_config() {
        let config = SourceConfig {
            transaction_url: "http://localhost:5000/transaction".to_string(),
            health_url: "http://localhost:5000/health".to_string(),
            fetch_timeout_ms: 5_000,
        };
        let source = HttpTransactionSource::new(&config).unwrap();
        assert_eq!(source.transaction_url(), "http://localhost:5000/transaction");
    }
}
