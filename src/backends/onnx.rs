//! ONNX Runtime backends for the classifier and the segmentation model
//!
//! Both sessions are created once at bootstrap and shared by every request.
//! `Session::run` needs exclusive access, so each session sits behind a mutex
//! and concurrent requests run their forward passes back-to-back.

use crate::error::{Result, TaggerError};
use crate::inference::{ClassifierBackend, SegmentationBackend};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Build a CPU session from a model file
fn load_session(model_path: &Path, intra_threads: usize, artifact: &str) -> Result<Session> {
    let load_start = Instant::now();
    let load_err = |e: ort::Error| TaggerError::load_error_with_path(artifact, model_path, &e.to_string());

    let intra_threads = if intra_threads > 0 {
        intra_threads
    } else {
        std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(4)
    };

    let session = Session::builder()
        .map_err(load_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(load_err)?
        .with_intra_threads(intra_threads)
        .map_err(load_err)?
        .commit_from_file(model_path)
        .map_err(load_err)?;

    tracing::info!(
        "Loaded {} from {} ({} intra-op threads, {:.0}ms)",
        artifact,
        model_path.display(),
        intra_threads,
        load_start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(session)
}

/// Resolve the single input and output tensor names of a session
fn io_names(session: &Session, model_path: &Path, artifact: &str) -> Result<(String, String)> {
    let input = session.inputs.first().ok_or_else(|| {
        TaggerError::load_error_with_path(artifact, model_path, "graph declares no inputs")
    })?;
    let output = session.outputs.first().ok_or_else(|| {
        TaggerError::load_error_with_path(artifact, model_path, "graph declares no outputs")
    })?;
    Ok((input.name.clone(), output.name.clone()))
}

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loaded classification graph with its declared tensor names
#[derive(Debug)]
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxClassifier {
    /// Load the classifier; names are discovered here and reused for every call
    pub fn from_file<P: AsRef<Path>>(model_path: P, intra_threads: usize) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = load_session(model_path, intra_threads, "classification model")?;
        let (input_name, output_name) = io_names(&session, model_path, "classification model")?;

        tracing::debug!("Classifier tensors: input={input_name} output={output_name}");

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl ClassifierBackend for OnnxClassifier {
    fn predict(&self, input: Array4<f32>) -> Result<Vec<f32>> {
        let input_value = Tensor::from_array(input)
            .map_err(|e| TaggerError::inference(format!("Failed to convert input tensor: {e}")))?;

        let mut session = lock_session(&self.session);
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .map_err(|e| TaggerError::inference(format!("ONNX inference failed: {e}")))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            TaggerError::inference(format!("Output tensor '{}' not found", self.output_name))
        })?;
        let array = output
            .try_extract_array::<f32>()
            .map_err(|e| TaggerError::inference(format!("Failed to extract output tensor: {e}")))?;

        // [1, classes] -> classes
        let shape = array.shape().to_vec();
        if shape.len() != 2 || shape.first().copied() != Some(1) {
            return Err(TaggerError::inference(format!(
                "Expected output shape [1, classes], got {shape:?}"
            )));
        }

        Ok(array.iter().copied().collect())
    }

    fn input_name(&self) -> &str {
        &self.input_name
    }

    fn output_name(&self) -> &str {
        &self.output_name
    }
}

/// Loaded segmentation graph
#[derive(Debug)]
pub struct OnnxSegmenter {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxSegmenter {
    /// Load the segmentation model
    pub fn from_file<P: AsRef<Path>>(model_path: P, intra_threads: usize) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = load_session(model_path, intra_threads, "segmentation model")?;
        let (input_name, output_name) = io_names(&session, model_path, "segmentation model")?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl SegmentationBackend for OnnxSegmenter {
    fn segment(&self, input: Array4<f32>) -> Result<Array4<f32>> {
        let input_value = Tensor::from_array(input).map_err(|e| {
            TaggerError::segmentation(format!("Failed to convert input tensor: {e}"))
        })?;

        let mut session = lock_session(&self.session);
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .map_err(|e| TaggerError::segmentation(format!("ONNX inference failed: {e}")))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            TaggerError::segmentation(format!("Output tensor '{}' not found", self.output_name))
        })?;
        let array = output.try_extract_array::<f32>().map_err(|e| {
            TaggerError::segmentation(format!("Failed to extract output tensor: {e}"))
        })?;

        let shape = array.shape().to_vec();
        match shape.as_slice() {
            &[batch, channels, height, width] => Array4::from_shape_vec(
                (batch, channels, height, width),
                array.iter().copied().collect(),
            )
            .map_err(|e| TaggerError::segmentation(format!("Failed to reshape output: {e}"))),
            _ => Err(TaggerError::segmentation(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_model_is_load_error() {
        let dir = TempDir::new().unwrap();
        let err = OnnxClassifier::from_file(dir.path().join("model.onnx"), 1).unwrap_err();
        assert!(matches!(err, TaggerError::Load(_)));
        assert!(err.to_string().contains("model.onnx"));
    }

    #[test]
    fn test_corrupt_model_is_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("isnet-general-use.onnx");
        std::fs::write(&path, b"not a protobuf graph").unwrap();
        let err = OnnxSegmenter::from_file(&path, 1).unwrap_err();
        assert!(matches!(err, TaggerError::Load(_)));
    }
}
