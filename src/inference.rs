//! Inference abstractions shared by the classifier and segmentation backends

use crate::error::{Result, TaggerError};
use ndarray::Array4;
use std::time::Instant;

/// A loaded classification graph
///
/// Implementations hold the model plus the input/output tensor names that
/// were resolved once at load time.
pub trait ClassifierBackend: Send + Sync {
    /// Run one forward pass on a batched `1 x H x W x C` tensor
    ///
    /// Returns the per-class probabilities of the single batch item.
    fn predict(&self, input: Array4<f32>) -> Result<Vec<f32>>;

    /// Name of the graph input tensor
    fn input_name(&self) -> &str;

    /// Name of the graph output tensor
    fn output_name(&self) -> &str;
}

/// A loaded segmentation graph
pub trait SegmentationBackend: Send + Sync {
    /// Run one forward pass on a batched `1 x C x H x W` tensor
    ///
    /// Returns the raw `1 x K x H x W` output; channel 0 is the mask.
    fn segment(&self, input: Array4<f32>) -> Result<Array4<f32>>;
}

/// Classification engine owning the model handle
pub struct InferenceEngine {
    backend: Box<dyn ClassifierBackend>,
}

impl InferenceEngine {
    /// Wrap a loaded classifier
    #[must_use]
    pub fn new(backend: Box<dyn ClassifierBackend>) -> Self {
        Self { backend }
    }

    /// Execute one forward pass
    ///
    /// The tensor must carry a batch dimension of exactly one. No retries are
    /// attempted; failures surface as [`TaggerError::Inference`].
    pub fn run(&self, tensor: Array4<f32>) -> Result<Vec<f32>> {
        let shape = tensor.shape().to_vec();
        if shape.first().copied() != Some(1) {
            return Err(TaggerError::inference(format!(
                "Expected a batch of one, got input shape {shape:?}"
            )));
        }

        let start = Instant::now();
        let probabilities = self.backend.predict(tensor)?;

        if probabilities.is_empty() {
            return Err(TaggerError::inference("Model returned an empty output"));
        }

        tracing::debug!(
            input = self.backend.input_name(),
            output = self.backend.output_name(),
            classes = probabilities.len(),
            "Inference complete: {:.2}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(probabilities)
    }

    /// Name of the graph input tensor
    #[must_use]
    pub fn input_name(&self) -> &str {
        self.backend.input_name()
    }

    /// Name of the graph output tensor
    #[must_use]
    pub fn output_name(&self) -> &str {
        self.backend.output_name()
    }
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("input_name", &self.backend.input_name())
            .field("output_name", &self.backend.output_name())
            .finish()
    }
}
