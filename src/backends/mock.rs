//! Mock backends for exercising the pipelines without model files
//!
//! These stand in for ONNX sessions in unit and integration tests. They
//! record how often they were called so tests can assert on reuse.

use crate::error::{Result, TaggerError};
use crate::inference::{ClassifierBackend, SegmentationBackend};
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type ProbabilityFn = dyn Fn(&Array4<f32>) -> Vec<f32> + Send + Sync;

/// Mock classifier returning scripted probabilities
pub struct MockClassifier {
    probabilities: Box<ProbabilityFn>,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockClassifier {
    /// Always return `classes` copies of `value`
    #[must_use]
    pub fn constant(classes: usize, value: f32) -> Self {
        Self::from_fn(move |_| vec![value; classes])
    }

    /// Always return the given probabilities
    #[must_use]
    pub fn fixed(probabilities: Vec<f32>) -> Self {
        Self::from_fn(move |_| probabilities.clone())
    }

    /// Compute probabilities from the input tensor
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Array4<f32>) -> Vec<f32> + Send + Sync + 'static,
    {
        Self {
            probabilities: Box::new(f),
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail every call with an inference error
    #[must_use]
    pub fn failing(message: &str) -> Self {
        let mut mock = Self::constant(0, 0.0);
        mock.failure = Some(message.to_string());
        mock
    }

    /// Shared call counter
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl ClassifierBackend for MockClassifier {
    fn predict(&self, input: Array4<f32>) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(TaggerError::inference(message.clone()));
        }
        Ok((self.probabilities)(&input))
    }

    fn input_name(&self) -> &str {
        "input_1:0"
    }

    fn output_name(&self) -> &str {
        "predictions_sigmoid"
    }
}

/// Mock segmentation model producing a centered square mask
pub struct MockSegmenter {
    output_size: usize,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockSegmenter {
    /// Mask of `output_size x output_size` with the middle half set to foreground
    #[must_use]
    pub fn new(output_size: usize) -> Self {
        Self {
            output_size,
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail every call with a segmentation error
    #[must_use]
    pub fn failing(message: &str) -> Self {
        let mut mock = Self::new(1);
        mock.failure = Some(message.to_string());
        mock
    }

    /// Shared call counter
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl SegmentationBackend for MockSegmenter {
    fn segment(&self, _input: Array4<f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(TaggerError::segmentation(message.clone()));
        }

        let size = self.output_size;
        let (lo, hi) = (size / 4, size - size / 4);
        Ok(Array4::from_shape_fn((1, 1, size, size), |(_, _, y, x)| {
            if (lo..hi).contains(&y) && (lo..hi).contains(&x) {
                // Raw logits-like range, the remover min-max normalizes
                4.0
            } else {
                -2.0
            }
        }))
    }
}
