//! Fraud Sentinel Library
//!
//! A real-time transaction scoring loop: pull one transaction at a time from
//! an upstream source, score it with a pre-trained fraud classifier, record
//! the decision idempotently and alert on fraud.

pub mod alerts;
pub mod config;
pub mod error;
pub mod features;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod source;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{PipelineError, PipelineResult};
pub use features::{FeatureSchema, FeatureTransformer, FeatureVector};
pub use models::inference::{OnnxScorer, Scorer};
pub use orchestrator::{Components, CycleOutcome, Orchestrator, PollPolicy};
pub use store::{PutOutcome, ResultStore};
pub use types::{alert::FraudAlert, scored::ScoredTransaction, transaction::Transaction};
