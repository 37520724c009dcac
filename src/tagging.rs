//! Tag extraction: preprocessing, inference and thresholded aggregation

use crate::config::DEFAULT_THRESHOLD;
use crate::error::{Result, TaggerError};
use crate::inference::InferenceEngine;
use crate::tags::TagTable;
use crate::utils::ImagePreprocessor;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;

/// One predicted tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagResult {
    pub label: String,
    pub score: f32,
    pub category: i64,
}

/// Keep every class scoring at least `threshold`, highest score first
///
/// Ties keep index order, so identical inputs always produce identical output.
/// Indices beyond the end of `tag_table` are ignored; NaN never clears a
/// threshold.
#[must_use]
pub fn aggregate(probabilities: &[f32], tag_table: &TagTable, threshold: f32) -> Vec<TagResult> {
    let mut results: Vec<TagResult> = probabilities
        .iter()
        .zip(tag_table.iter())
        .filter(|(score, _)| **score >= threshold)
        .map(|(score, entry)| TagResult {
            label: entry.name.clone(),
            score: *score,
            category: entry.category,
        })
        .collect();

    // sort_by is stable, so equal scores stay in index order
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    results
}

/// Tagging pipeline: preprocessor, engine and tag table
#[derive(Debug)]
pub struct Tagger {
    engine: InferenceEngine,
    tags: TagTable,
    input_size: u32,
}

impl Tagger {
    /// Assemble a tagger from its loaded parts
    #[must_use]
    pub fn new(engine: InferenceEngine, tags: TagTable, input_size: u32) -> Self {
        Self {
            engine,
            tags,
            input_size,
        }
    }

    /// Tag encoded image bytes
    pub fn tag_bytes(&self, bytes: &[u8], threshold: Option<f32>) -> Result<Vec<TagResult>> {
        let image = ImagePreprocessor::decode(bytes)?;
        self.tag_image(&image, threshold)
    }

    /// Tag a decoded image
    pub fn tag_image(&self, image: &DynamicImage, threshold: Option<f32>) -> Result<Vec<TagResult>> {
        let threshold = threshold.unwrap_or(DEFAULT_THRESHOLD);
        let start = Instant::now();

        let tensor = ImagePreprocessor::preprocess(image, self.input_size)?;
        let batch = ImagePreprocessor::add_batch_dimension(tensor);
        let probabilities = self.engine.run(batch)?;

        if probabilities.len() != self.tags.len() {
            return Err(TaggerError::inference(format!(
                "Model produced {} scores but the tag table has {} entries",
                probabilities.len(),
                self.tags.len()
            )));
        }

        let tags = aggregate(&probabilities, &self.tags, threshold);
        tracing::debug!(
            "Tagged {}x{} image: {} tags >= {} in {:.2}ms",
            image.width(),
            image.height(),
            tags.len(),
            threshold,
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(tags)
    }

    /// The tag table in use
    #[must_use]
    pub fn tags(&self) -> &TagTable {
        &self.tags
    }

    /// Square input edge length
    #[must_use]
    pub fn input_size(&self) -> u32 {
        self.input_size
    }
}
