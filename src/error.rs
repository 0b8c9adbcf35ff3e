//! Error taxonomy for the scoring loop
//!
//! Every per-transaction failure is one of these variants. The orchestrator
//! catches them at the cycle boundary; only `ModelLoad` and a failed schema
//! setup are allowed to stop the process, and only at startup.

use thiserror::Error;

/// Errors raised by pipeline components
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Raw record is missing fields or carries the wrong types. Never retried.
    #[error("malformed transaction{}: {reason}", fmt_id(.transaction_id))]
    MalformedInput {
        transaction_id: Option<String>,
        reason: String,
    },

    /// Fetch or notify failed on the network or timed out
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Result store cannot be reached; the next cycle is the retry
    #[error("result store unavailable: {0}")]
    StoreUnavailable(String),

    /// Constraint failure other than a duplicate key, fatal for one write
    #[error("result store rejected write for {transaction_id}: {reason}")]
    StoreIntegrity {
        transaction_id: String,
        reason: String,
    },

    /// Scoring artifact could not be loaded or does not match the feature schema
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// The model failed on one feature vector
    #[error("scoring failed: {0}")]
    Scoring(String),

    /// Alert transport failed
    #[error("alert delivery failed: {0}")]
    AlertDelivery(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

fn fmt_id(id: &Option<String>) -> String {
    match id {
        Some(id) => format!(" {id}"),
        None => String::new(),
    }
}

impl PipelineError {
    /// Shorthand for a malformed record with a known identifier
    pub fn malformed(transaction_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            transaction_id: transaction_id.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Whether the polling cadence will eventually retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::StoreUnavailable(_) | Self::AlertDelivery(_)
        )
    }

    /// Short label used in structured logs and counters
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedInput { .. } => "malformed_input",
            Self::TransientNetwork(_) => "transient_network",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::StoreIntegrity { .. } => "store_integrity",
            Self::ModelLoad(_) => "model_load",
            Self::Scoring(_) => "scoring",
            Self::AlertDelivery(_) => "alert_delivery",
            Self::Config(_) => "config",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::TransientNetwork("timeout".into()).is_retryable());
        assert!(PipelineError::StoreUnavailable("down".into()).is_retryable());
        assert!(!PipelineError::malformed(Some("T1"), "missing amt").is_retryable());
        assert!(!PipelineError::Scoring("nan".into()).is_retryable());
        assert!(!PipelineError::ModelLoad("missing".into()).is_retryable());
    }

    #[test]
    fn test_malformed_message_carries_id() {
        let err = PipelineError::malformed(Some("T1"), "missing field `amt`");
        assert_eq!(err.to_string(), "malformed transaction T1: missing field `amt`");

        let err = PipelineError::malformed(None, "not an object");
        assert_eq!(err.to_string(), "malformed transaction: not an object");
    }
}
