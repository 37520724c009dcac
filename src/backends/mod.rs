//! Inference backends
//!
//! - ONNX Runtime sessions for the classifier and the segmentation model
//! - Mock backends for tests and for running the HTTP surface without models

pub mod mock;
pub mod onnx;

pub use self::mock::{MockClassifier, MockSegmenter};
pub use self::onnx::{OnnxClassifier, OnnxSegmenter};
