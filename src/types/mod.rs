//! Type definitions for the scoring loop

pub mod alert;
pub mod scored;
pub mod transaction;

pub use alert::{FraudAlert, RiskLevel, RiskLevelThresholds};
pub use scored::{ScoredTransaction, Threshold};
pub use transaction::{RawRecord, Transaction};
