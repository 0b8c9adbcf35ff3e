//! Scoring model components

pub mod inference;
pub mod loader;

pub use inference::{OnnxScorer, Scorer};
pub use loader::{LoadedModel, ModelLoader};
