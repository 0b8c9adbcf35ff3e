//! Raw transaction -> model feature vector

pub mod schema;
pub mod transformer;

pub use schema::FeatureSchema;
pub use transformer::{FeatureTransformer, FeatureVector};
