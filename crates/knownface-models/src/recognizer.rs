//! ArcFace face recognizer via ONNX Runtime.
//!
//! Produces L2-normalized 512-dimensional embeddings from aligned face crops.

use std::path::{Path, PathBuf};

use image::RgbImage;
use knownface_core::{BoundingBox, Embedding};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::alignment::{self, ALIGNED_SIZE};

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD
const ARCFACE_EMBEDDING_DIM: usize = 512;

/// Euclidean match threshold for unit-length ArcFace embeddings.
///
/// For unit vectors d² = 2 − 2·cos, so 1.1 accepts pairs with cosine
/// similarity above ~0.395, the usual operating point for w600k_r50.
pub const ARCFACE_DISTANCE_THRESHOLD: f32 = 1.1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {} (download w600k_r50.onnx from insightface)", .0.display())]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; the detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
    model_version: String,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model; the file stem becomes the model version.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let model_version = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "arcface".to_string());

        tracing::info!(
            path = %model_path.display(),
            model_version = %model_version,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session,
            model_version,
        })
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Embed one detected face of `image`.
    pub fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(image, landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::with_model_version(
            l2_normalize(raw.to_vec()),
            self.model_version.clone(),
        ))
    }
}

/// Aligned 112×112 RGB crop into a normalized NCHW tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_shape_and_channels() {
        let crop = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([255, 127, 0]));
        let tensor = preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] - (127.0 - 127.5) / 127.5).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_matches_cosine_operating_point() {
        let distance_at = |cos: f32| (2.0 - 2.0 * cos).sqrt();
        assert!(distance_at(0.40) < ARCFACE_DISTANCE_THRESHOLD);
        assert!(distance_at(0.38) > ARCFACE_DISTANCE_THRESHOLD);
    }

    #[test]
    fn test_l2_normalize_zero_vector_untouched() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
