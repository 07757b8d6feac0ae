//! ONNX model loader and runtime classifier

use crate::encoder::FeatureMatrix;
use crate::models::classifier::Classifier;
use anyhow::{anyhow, bail, Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Gradient boosted classifier exported to ONNX
pub struct OnnxClassifier {
    /// ONNX Runtime session; `run` needs exclusive access
    session: Mutex<Session>,
    /// Input name for the model
    input_name: String,
    /// Output name for probabilities
    output_name: String,
    n_features: usize,
}

/// Loader for ONNX artifacts
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> Self {
        Self::with_threads(1)
    }

    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Self {
        // The environment is process-wide; a second commit keeps the first one
        if let Err(e) = ort::init().commit() {
            warn!(error = %e, "Failed to initialize ONNX Runtime environment");
        }
        Self { onnx_threads }
    }

    /// Load an ONNX classifier expecting `n_features` input columns
    pub fn load<P: AsRef<Path>>(&self, path: P, n_features: usize) -> Result<OnnxClassifier> {
        let path = path.as_ref();

        info!(path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| {
                session
                    .outputs
                    .last()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| "probabilities".to_string())
            });

        info!(
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(OnnxClassifier {
            session: Mutex::new(session),
            input_name,
            output_name,
            n_features,
        })
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for OnnxClassifier {
    fn kind(&self) -> &'static str {
        "onnx"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>> {
        if matrix.n_rows == 0 {
            return Ok(Vec::new());
        }

        let shape = vec![matrix.n_rows as i64, matrix.n_cols as i64];
        let input_tensor = Tensor::from_array((shape, matrix.data.clone()))
            .context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        let outputs = session.run(ort::inputs![&self.input_name => input_tensor])?;

        let probs = extract_probabilities(&outputs, &self.output_name, matrix.n_rows)?;
        debug!(rows = matrix.n_rows, "ONNX inference complete");
        Ok(probs)
    }
}

/// Pull positive-class probabilities out of the session outputs.
///
/// Handles plain tensor outputs as well as the seq(map(int64, float))
/// layout produced by tree-ensemble converters.
fn extract_probabilities(
    outputs: &SessionOutputs,
    output_name: &str,
    n_rows: usize,
) -> Result<Vec<f64>> {
    if let Some(output) = outputs.get(output_name) {
        return extract_from_value(&output, n_rows);
    }

    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Ok(probs) = extract_from_value(&output, n_rows) {
            return Ok(probs);
        }
    }

    bail!("no probability output among model outputs")
}

fn extract_from_value(output: &DynValue, n_rows: usize) -> Result<Vec<f64>> {
    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let dims: Vec<i64> = shape.iter().copied().collect();
        return positive_class_from_tensor(&dims, data, n_rows);
    }

    if DynSequenceValueType::can_downcast(&output.dtype()) {
        return extract_from_sequence_map(output);
    }

    bail!("unsupported output type {:?}", output.dtype())
}

/// `[n, 2]` tensors carry both classes; `[n]` or `[n, 1]` carry the positive one.
fn positive_class_from_tensor(dims: &[i64], data: &[f32], n_rows: usize) -> Result<Vec<f64>> {
    let n_cols = match dims {
        [rows, cols] if *rows as usize == n_rows => *cols as usize,
        [rows] if *rows as usize == n_rows => 1,
        _ => bail!("unexpected probability shape {:?} for {} rows", dims, n_rows),
    };
    if n_cols == 0 || data.len() != n_rows * n_cols {
        bail!("probability tensor {:?} holds {} values", dims, data.len());
    }

    let column = if n_cols >= 2 { 1 } else { 0 };
    Ok(data
        .chunks_exact(n_cols)
        .map(|row| row[column] as f64)
        .collect())
}

fn extract_from_sequence_map(output: &DynValue) -> Result<Vec<f64>> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| anyhow!("Failed to downcast to sequence: {}", e))?;

    let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;

    let mut probs = Vec::with_capacity(maps.len());
    for map_value in &maps {
        let kv_pairs = map_value.try_extract_key_values::<i64, f32>()?;
        let positive = kv_pairs
            .iter()
            .find(|(class_id, _)| *class_id == 1)
            .map(|(_, p)| *p as f64)
            .or_else(|| {
                kv_pairs
                    .iter()
                    .find(|(class_id, _)| *class_id == 0)
                    .map(|(_, p)| 1.0 - *p as f64)
            })
            .ok_or_else(|| anyhow!("No probability found in map"))?;
        probs.push(positive);
    }
    Ok(probs)
}
