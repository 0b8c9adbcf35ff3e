//! Scoring adapter around the pre-trained fraud classifier

use crate::error::{PipelineError, PipelineResult};
use crate::features::{FeatureSchema, FeatureVector};
use crate::models::loader::{LoadedModel, ModelLoader};
use ort::memory::Allocator;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Opaque classifier: feature vector in, fraud probability out.
///
/// Implementations must be cheap to call from a blocking thread and must
/// not retry internally; a failure only costs the current transaction.
pub trait Scorer: Send + Sync {
    /// Probability of the positive (fraud) class, in `[0, 1]`
    fn score(&self, features: &FeatureVector) -> PipelineResult<f64>;

    /// Schema the scorer was verified against
    fn schema(&self) -> &FeatureSchema;

    /// Artifact version label, for logs
    fn version(&self) -> &str;
}

/// Reject probabilities the decision rule cannot use
pub fn check_probability(p: f64) -> PipelineResult<f64> {
    if p.is_nan() || !(0.0..=1.0).contains(&p) {
        return Err(PipelineError::Scoring(format!(
            "model returned probability {p} outside [0, 1]"
        )));
    }
    Ok(p)
}

/// ONNX Runtime backed scorer for a single versioned artifact
pub struct OnnxScorer {
    /// `Session::run` needs exclusive access
    model: Mutex<LoadedModel>,
    schema: Arc<FeatureSchema>,
    version: String,
}

impl OnnxScorer {
    /// Load the artifact and verify it accepts rows of the schema's width.
    pub fn load<P: AsRef<Path>>(
        path: P,
        version: &str,
        schema: Arc<FeatureSchema>,
        onnx_threads: usize,
    ) -> PipelineResult<Self> {
        let model = ModelLoader::with_threads(onnx_threads).load_model(path, version)?;

        if let Some(width) = model.input_width {
            if width != schema.width() {
                return Err(PipelineError::ModelLoad(format!(
                    "model {} expects {} input columns but feature schema {} produces {}",
                    version,
                    width,
                    schema.version,
                    schema.width()
                )));
            }
        }

        info!(
            version = %version,
            schema = %schema.version,
            features = schema.width(),
            "Scoring adapter ready"
        );

        Ok(Self {
            model: Mutex::new(model),
            schema,
            version: version.to_string(),
        })
    }

    fn run(&self, row: Vec<f32>) -> PipelineResult<f64> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| PipelineError::Scoring(format!("model lock poisoned: {e}")))?;

        // Shape [1, num_features]
        let shape = vec![1_i64, row.len() as i64];
        let input_tensor = Tensor::from_array((shape, row))
            .map_err(|e| PipelineError::Scoring(format!("failed to create input tensor: {e}")))?;

        let model = &mut *model;
        let outputs = model
            .session
            .run(ort::inputs![model.input_name.as_str() => input_tensor])
            .map_err(|e| PipelineError::Scoring(format!("inference failed: {e}")))?;

        extract_probability(&outputs, &model.output_name)
    }
}

impl Scorer for OnnxScorer {
    fn score(&self, features: &FeatureVector) -> PipelineResult<f64> {
        if features.schema_version != self.schema.version {
            return Err(PipelineError::Scoring(format!(
                "feature vector built for schema {} but model {} uses {}",
                features.schema_version, self.version, self.schema.version
            )));
        }

        let probability = check_probability(self.run(features.encode(&self.schema))?)?;
        debug!(version = %self.version, probability, "Model inference complete");
        Ok(probability)
    }

    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// Extract the fraud-class probability from the model outputs.
///
/// Handles plain tensor outputs and the `seq(map(int64, float))` shape
/// emitted by converted scikit-learn pipelines.
fn extract_probability(outputs: &ort::session::SessionOutputs, output_name: &str) -> PipelineResult<f64> {
    if let Some(output) = outputs.get(output_name) {
        if let Some(p) = probability_from_value(&output) {
            return Ok(p);
        }
    }

    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Some(p) = probability_from_value(&output) {
            debug!(output = %name, prob = p, "Extracted probability from fallback output");
            return Ok(p);
        }
    }

    Err(PipelineError::Scoring(
        "no probability output could be read from the model".to_string(),
    ))
}

fn probability_from_value(output: &ort::value::DynValue) -> Option<f64> {
    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let dims: Vec<i64> = shape.iter().copied().collect();
        return fraud_prob_from_tensor(&dims, data);
    }

    if DynSequenceValueType::can_downcast(&output.dtype()) {
        return fraud_prob_from_sequence_map(output);
    }

    None
}

fn fraud_prob_from_sequence_map(output: &ort::value::DynValue) -> Option<f64> {
    let allocator = Allocator::default();
    let sequence = output.downcast_ref::<DynSequenceValueType>().ok()?;
    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .ok()?;

    // batch size is always 1
    let kv_pairs = maps.first()?.try_extract_key_values::<i64, f32>().ok()?;
    class_one_probability(&kv_pairs)
}

/// Probability of class 1 from `(class, probability)` pairs
fn class_one_probability(pairs: &[(i64, f32)]) -> Option<f64> {
    if let Some((_, p)) = pairs.iter().find(|(class, _)| *class == 1) {
        return Some(*p as f64);
    }
    pairs
        .iter()
        .find(|(class, _)| *class == 0)
        .map(|(_, p)| 1.0 - *p as f64)
}

/// Probability of class 1 from a `[batch, classes]`, `[classes]` or `[batch, 1]` tensor
fn fraud_prob_from_tensor(dims: &[i64], data: &[f32]) -> Option<f64> {
    let classes = *dims.last()? as usize;
    match classes {
        0 => None,
        1 => data.first().map(|&v| v as f64),
        _ => data.get(1).map(|&v| v as f64),
    }
}
