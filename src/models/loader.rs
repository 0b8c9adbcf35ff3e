//! ONNX model loader

use crate::error::{PipelineError, PipelineResult};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::ValueType;
use std::path::Path;
use tracing::{info, warn};

/// Loaded ONNX model with metadata
pub struct LoadedModel {
    /// Artifact version label from configuration
    pub version: String,
    /// ONNX Runtime session
    pub session: Session,
    /// Input name for the model
    pub input_name: String,
    /// Output name for probabilities
    pub output_name: String,
    /// Declared width of the input row, `None` when the dimension is dynamic
    pub input_width: Option<usize>,
}

/// Loader for ONNX models
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Self {
        Self {
            onnx_threads: onnx_threads.max(1),
        }
    }

    /// Load the scoring artifact. Any failure here is fatal for the process.
    pub fn load_model<P: AsRef<Path>>(&self, path: P, version: &str) -> PipelineResult<LoadedModel> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PipelineError::ModelLoad(format!(
                "model artifact not found at {}",
                path.display()
            )));
        }

        info!(version = %version, path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()
            .map_err(|e| load_error("failed to create session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_error("failed to set optimization level", e))?
            .with_intra_threads(self.onnx_threads)
            .map_err(|e| load_error("failed to set thread count", e))?
            .commit_from_file(path)
            .map_err(|e| load_error(&format!("failed to load model from {}", path.display()), e))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| PipelineError::ModelLoad("model declares no inputs".to_string()))?;
        let input_name = input.name.clone();

        let input_width = match &input.input_type {
            ValueType::Tensor { shape, .. } => shape
                .last()
                .copied()
                .filter(|&dim| dim > 0)
                .map(|dim| dim as usize),
            other => {
                return Err(PipelineError::ModelLoad(format!(
                    "model input `{input_name}` must be a float tensor, found {other:?}"
                )))
            }
        };

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        if input_width.is_none() {
            warn!(version = %version, input = %input_name, "Model input width is dynamic; schema width cannot be verified");
        }

        info!(
            version = %version,
            input = %input_name,
            output = %output_name,
            input_width = ?input_width,
            "Model loaded successfully"
        );

        Ok(LoadedModel {
            version: version.to_string(),
            session,
            input_name,
            output_name,
            input_width,
        })
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self { onnx_threads: 1 }
    }
}

fn load_error(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::ModelLoad(format!("{context}: {e}"))
}
