//! Pairwise distance matching of query faces against a gallery snapshot.
//!
//! Brute force: every query face is compared with every reference embedding,
//! O(faces × embeddings × dim). This is meant for small enrolled galleries and
//! is not an approximate nearest-neighbour index.

use serde::Serialize;

use crate::error::MatchError;
use crate::gallery::GallerySnapshot;
use crate::types::{BoundingBox, DetectedFace};

/// Default Euclidean distance below which two faces are the same identity.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.6;

/// A gallery identity that cleared the threshold for one query face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityMatch {
    pub id: String,
    /// Smallest distance between the face and any of the identity's embeddings.
    pub distance: f32,
}

/// Every identity matching one detected face, in gallery order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMatches {
    pub face_index: usize,
    pub region: BoundingBox,
    pub matches: Vec<IdentityMatch>,
}

impl FaceMatches {
    pub fn is_match(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Per-face decisions for one query, plus the number of distances computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchReport {
    pub faces: Vec<FaceMatches>,
    pub comparisons: usize,
}

/// Strategy for matching query faces against a gallery snapshot.
pub trait Matcher {
    fn compare(
        &self,
        faces: &[DetectedFace],
        gallery: &GallerySnapshot,
    ) -> Result<MatchReport, MatchError>;
}

/// Euclidean-distance matcher with an any-hit policy per identity.
///
/// An identity matches a face when any one of its embeddings is strictly
/// closer than the threshold. All matching identities are reported, not only
/// the closest, and no comparison is skipped after a hit.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Result<Self, MatchError> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(MatchError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DISTANCE_THRESHOLD,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        faces: &[DetectedFace],
        gallery: &GallerySnapshot,
    ) -> Result<MatchReport, MatchError> {
        let mut comparisons = 0usize;
        let mut results = Vec::with_capacity(faces.len());

        for (face_index, face) in faces.iter().enumerate() {
            let mut matches = Vec::new();

            for entry in gallery.entries() {
                let mut best = f32::INFINITY;
                for reference in &entry.embeddings {
                    let distance = reference.euclidean_distance(&face.embedding)?;
                    comparisons += 1;
                    best = best.min(distance);
                }

                if best < self.threshold {
                    matches.push(IdentityMatch {
                        id: entry.id.clone(),
                        distance: best,
                    });
                }
            }

            tracing::debug!(
                face = face_index,
                matches = matches.len(),
                threshold = self.threshold,
                "face compared against gallery"
            );

            results.push(FaceMatches {
                face_index,
                region: face.region.clone(),
                matches,
            });
        }

        Ok(MatchReport {
            faces: results,
            comparisons,
        })
    }
}
