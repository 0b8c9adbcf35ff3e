//! Versioned feature schema shared by the transformer and the scoring model
//!
//! The model sees a flat `f32` row: the numeric columns in declared order,
//! then one one-hot block per categorical column. Column order is part of
//! the contract; changing it requires a new version string.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Numeric columns of the built-in schema, in model order
pub const V1_NUMERIC: [&str; 6] = [
    "amt",
    "hour",
    "day_of_week",
    "city_pop",
    "is_night",
    "is_weekend",
];

/// Merchant categories seen during training
pub const V1_CATEGORIES: [&str; 14] = [
    "entertainment",
    "food_dining",
    "gas_transport",
    "grocery_net",
    "grocery_pos",
    "health_fitness",
    "home",
    "kids_pets",
    "misc_net",
    "misc_pos",
    "personal_care",
    "shopping_net",
    "shopping_pos",
    "travel",
];

pub const V1_GENDERS: [&str; 2] = ["F", "M"];

/// Named, versioned description of the model input row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: String,
    pub numeric: Vec<String>,
    pub categories: Vec<String>,
    pub genders: Vec<String>,
}

impl FeatureSchema {
    /// The schema the bundled model was trained with
    pub fn v1() -> Self {
        Self {
            version: "v1".to_string(),
            numeric: V1_NUMERIC.iter().map(|s| s.to_string()).collect(),
            categories: V1_CATEGORIES.iter().map(|s| s.to_string()).collect(),
            genders: V1_GENDERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Load a schema sidecar (JSON) written next to the model artifact
    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::ModelLoad(format!("cannot read feature schema {}: {e}", path.display()))
        })?;
        let schema: FeatureSchema = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::ModelLoad(format!("invalid feature schema {}: {e}", path.display()))
        })?;
        schema.check_numeric_columns()?;
        Ok(schema)
    }

    /// The transformer only knows how to produce the v1 numeric columns.
    fn check_numeric_columns(&self) -> PipelineResult<()> {
        if self.numeric.iter().map(String::as_str).ne(V1_NUMERIC.iter().copied()) {
            return Err(PipelineError::ModelLoad(format!(
                "schema {} declares numeric columns {:?}, expected {:?}",
                self.version, self.numeric, V1_NUMERIC
            )));
        }
        Ok(())
    }

    /// Number of model input columns
    pub fn width(&self) -> usize {
        self.numeric.len() + self.categories.len() + self.genders.len()
    }

    /// Column names in model order, one-hot columns as `category_<value>`
    pub fn column_names(&self) -> Vec<String> {
        let mut names = self.numeric.clone();
        names.extend(self.categories.iter().map(|c| format!("category_{c}")));
        names.extend(self.genders.iter().map(|g| format!("gender_{g}")));
        names
    }

    pub(crate) fn category_index(&self, category: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == category)
    }

    pub(crate) fn gender_index(&self, gender: &str) -> Option<usize> {
        self.genders.iter().position(|g| g == gender)
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::v1()
    }
}
