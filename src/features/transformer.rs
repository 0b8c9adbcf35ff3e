//! Feature transformation for fraud model inference.
//!
//! Derives the temporal features from the transaction's recorded wall-clock
//! time (never the host timezone), exactly as the training pipeline did.

use crate::error::{PipelineError, PipelineResult};
use crate::features::schema::FeatureSchema;
use crate::types::transaction::Transaction;
use chrono::{Datelike, Timelike};
use std::sync::Arc;

/// Model-ready view of one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    /// Schema version this vector was built for
    pub schema_version: String,
    pub amount: f64,
    /// Hour of day, 0-23
    pub hour: u32,
    /// Day of week, Monday = 0 .. Sunday = 6
    pub day_of_week: u32,
    pub city_pop: i64,
    /// hour >= 22 or hour <= 6
    pub is_night: bool,
    /// Saturday or Sunday
    pub is_weekend: bool,
    pub category: String,
    pub gender: String,
}

impl FeatureVector {
    /// Encode into the flat model row described by `schema`.
    ///
    /// Categorical values the schema does not know encode as an all-zero block.
    pub fn encode(&self, schema: &FeatureSchema) -> Vec<f32> {
        let mut row = Vec::with_capacity(schema.width());

        row.push(self.amount as f32);
        row.push(self.hour as f32);
        row.push(self.day_of_week as f32);
        row.push(self.city_pop as f32);
        row.push(if self.is_night { 1.0 } else { 0.0 });
        row.push(if self.is_weekend { 1.0 } else { 0.0 });

        let category = schema.category_index(&self.category);
        row.extend((0..schema.categories.len()).map(|i| one_hot(category, i)));

        let gender = schema.gender_index(&self.gender);
        row.extend((0..schema.genders.len()).map(|i| one_hot(gender, i)));

        row
    }
}

fn one_hot(hit: Option<usize>, i: usize) -> f32 {
    if hit == Some(i) {
        1.0
    } else {
        0.0
    }
}

/// Pure transaction -> feature vector mapping bound to one schema
#[derive(Debug, Clone)]
pub struct FeatureTransformer {
    schema: Arc<FeatureSchema>,
}

impl FeatureTransformer {
    pub fn new(schema: Arc<FeatureSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Transform a parsed transaction.
    pub fn transform(&self, tx: &Transaction) -> PipelineResult<FeatureVector> {
        let id = Some(tx.transaction_id.as_str());

        if tx.category.trim().is_empty() {
            return Err(PipelineError::malformed(id, "empty category"));
        }
        if tx.gender.trim().is_empty() {
            return Err(PipelineError::malformed(id, "empty gender"));
        }

        let hour = tx.timestamp.hour();
        let day_of_week = tx.timestamp.weekday().num_days_from_monday();

        Ok(FeatureVector {
            schema_version: self.schema.version.clone(),
            amount: tx.amount,
            hour,
            day_of_week,
            city_pop: tx.city_pop,
            is_night: hour >= 22 || hour <= 6,
            is_weekend: day_of_week >= 5,
            category: tx.category.clone(),
            gender: tx.gender.clone(),
        })
    }
}

impl Default for FeatureTransformer {
    fn default() -> Self {
        Self::new(Arc::new(FeatureSchema::v1()))
    }
}
