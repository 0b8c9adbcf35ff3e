//! Fraud alert data structures

use crate::types::scored::ScoredTransaction;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Configurable risk level thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            low: 0.4,
            medium: 0.6,
            high: 0.8,
            critical: 0.95,
        }
    }
}

/// Alert payload published for a transaction classified as fraudulent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Unique alert identifier
    pub alert_id: String,

    /// Associated transaction ID
    pub transaction_id: String,

    /// Model fraud probability (0.0 - 1.0)
    pub fraud_probability: f64,

    /// Risk level classification
    pub risk_level: RiskLevel,

    /// Transaction amount
    pub amount: f64,

    /// Merchant category
    pub category: String,

    /// Merchant name
    pub merchant: String,

    /// Wall-clock time of the transaction
    pub transaction_time: NaiveDateTime,

    /// Alert generation timestamp
    pub timestamp: DateTime<Utc>,
}

impl FraudAlert {
    /// Build an alert from a persisted fraud decision
    pub fn from_scored(scored: &ScoredTransaction, thresholds: &RiskLevelThresholds) -> Self {
        let tx = &scored.transaction;
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            transaction_id: tx.transaction_id.clone(),
            fraud_probability: scored.fraud_probability,
            risk_level: RiskLevel::from_score(scored.fraud_probability, thresholds),
            amount: tx.amount,
            category: tx.category.clone(),
            merchant: tx.merchant.clone(),
            transaction_time: tx.timestamp,
            timestamp: Utc::now(),
        }
    }

    /// One-line human summary used by chat-style transports
    pub fn headline(&self) -> String {
        format!(
            "FRAUD ALERT [{}] transaction {} | ${:.2} at {} ({}) | probability {:.2}%",
            self.risk_level.as_str(),
            self.transaction_id,
            self.amount,
            self.merchant,
            self.category,
            self.fraud_probability * 100.0
        )
    }
}
