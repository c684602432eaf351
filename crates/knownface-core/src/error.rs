use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("no faces detected in the query image")]
    NoFacesDetected,
    #[error("gallery directory {} is unavailable: {reason}", path.display())]
    GalleryUnavailable { path: PathBuf, reason: String },
    #[error("gallery directory {} has no usable reference faces ({skipped} reference image(s) skipped)", path.display())]
    GalleryEmpty { path: PathBuf, skipped: usize },
    #[error("embedding dimension mismatch: expected {expected} values, got {actual}; gallery and query were extracted by different models")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding extraction timed out after {0:?}")]
    ExtractionTimeout(Duration),
    #[error("embedding extraction failed: {0}")]
    ExtractionFailed(#[from] ProviderError),
    #[error("distance threshold must be finite and positive, got {0}")]
    InvalidThreshold(f32),
    #[error("extraction timeout must be non-zero")]
    InvalidTimeout,
}

/// Coarse classification of a [`MatchError`], used by callers to pick a
/// response. Nothing in the core retries on any class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Something about the query or configuration; retrying the same input fails again.
    Input,
    /// The gallery or the provider deadline; never a negative identity result.
    Resource,
    /// The embedding provider rejected or failed on the input.
    Provider,
}

impl MatchError {
    pub fn class(&self) -> FailureClass {
        match self {
            MatchError::NoFacesDetected
            | MatchError::DimensionMismatch { .. }
            | MatchError::InvalidThreshold(_)
            | MatchError::InvalidTimeout => FailureClass::Input,
            MatchError::GalleryUnavailable { .. }
            | MatchError::GalleryEmpty { .. }
            | MatchError::ExtractionTimeout(_) => FailureClass::Resource,
            MatchError::ExtractionFailed(_) => FailureClass::Provider,
        }
    }

    /// Stable machine-readable name of the failure.
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::NoFacesDetected => "no_faces_detected",
            MatchError::GalleryUnavailable { .. } => "gallery_unavailable",
            MatchError::GalleryEmpty { .. } => "gallery_empty",
            MatchError::DimensionMismatch { .. } => "dimension_mismatch",
            MatchError::ExtractionTimeout(_) => "extraction_timeout",
            MatchError::ExtractionFailed(_) => "extraction_failed",
            MatchError::InvalidThreshold(_) => "invalid_threshold",
            MatchError::InvalidTimeout => "invalid_timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gallery_failures_are_resource_class() {
        let missing = MatchError::GalleryUnavailable {
            path: PathBuf::from("/nope"),
            reason: "not found".into(),
        };
        let empty = MatchError::GalleryEmpty {
            path: PathBuf::from("/faces"),
            skipped: 2,
        };
        assert_eq!(missing.class(), FailureClass::Resource);
        assert_eq!(missing.code(), "gallery_unavailable");
        assert_eq!(empty.class(), FailureClass::Resource);
        assert!(empty.to_string().contains("2 reference image(s) skipped"));
    }

    #[test]
    fn test_input_and_provider_classes() {
        assert_eq!(MatchError::NoFacesDetected.class(), FailureClass::Input);
        assert_eq!(
            MatchError::DimensionMismatch { expected: 128, actual: 512 }.class(),
            FailureClass::Input
        );
        assert_eq!(
            MatchError::from(ProviderError::Decode("bad png".into())).class(),
            FailureClass::Provider
        );
        assert_eq!(MatchError::InvalidTimeout.class(), FailureClass::Input);
        assert_eq!(MatchError::InvalidTimeout.code(), "invalid_timeout");
    }
}
