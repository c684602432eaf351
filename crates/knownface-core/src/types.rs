use serde::{Deserialize, Serialize};

use crate::error::MatchError;

/// Bounding region of a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// A box with no landmarks and full confidence.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
            landmarks: None,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector produced by one model version.
///
/// Values are fixed at construction; two embeddings are only comparable when
/// they come from the same model, which shows up as equal lengths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn with_model_version(values: Vec<f32>, model_version: impl Into<String>) -> Self {
        Self {
            values,
            model_version: Some(model_version.into()),
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    /// Euclidean distance to `other`.
    ///
    /// Fails with [`MatchError::DimensionMismatch`] when the lengths differ;
    /// `self` is treated as the expected shape.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, MatchError> {
        if self.values.len() != other.values.len() {
            return Err(MatchError::DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

/// One occurrence of a face in an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub region: BoundingBox,
    pub embedding: Embedding,
}

impl DetectedFace {
    pub fn new(region: BoundingBox, embedding: Embedding) -> Self {
        Self { region, embedding }
    }
}
