//! Request facade: one query image in, one [`QueryResult`] out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::aggregate::{aggregate, QueryResult};
use crate::error::MatchError;
use crate::gallery::{GalleryCache, GallerySnapshot};
use crate::matcher::{EuclideanMatcher, Matcher, DEFAULT_DISTANCE_THRESHOLD};
use crate::provider::{extract_with_timeout, EmbeddingProvider};

/// Tunables for a [`FaceMatchService`].
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub gallery_dir: PathBuf,
    /// Euclidean distance strictly below which a face matches an identity.
    pub distance_threshold: f32,
    /// Deadline for each embedding extraction, query and gallery alike.
    pub extraction_timeout: Duration,
}

impl MatchConfig {
    pub fn new(gallery_dir: impl Into<PathBuf>) -> Self {
        Self {
            gallery_dir: gallery_dir.into(),
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            extraction_timeout: Duration::from_secs(10),
        }
    }
}

/// Matches query images against a cached gallery.
///
/// Cheap to share behind an `Arc`; concurrent requests only contend on a
/// gallery rebuild.
pub struct FaceMatchService<P> {
    provider: Arc<P>,
    gallery: GalleryCache<Arc<P>>,
    matcher: EuclideanMatcher,
    extraction_timeout: Duration,
}

impl<P: EmbeddingProvider> FaceMatchService<P> {
    pub fn new(provider: P, config: MatchConfig) -> Result<Self, MatchError> {
        if config.extraction_timeout.is_zero() {
            return Err(MatchError::InvalidTimeout);
        }
        let provider = Arc::new(provider);
        let matcher = EuclideanMatcher::new(config.distance_threshold)?;
        let gallery = GalleryCache::new(config.gallery_dir, Arc::clone(&provider))
            .with_extraction_timeout(config.extraction_timeout);

        Ok(Self {
            provider,
            gallery,
            matcher,
            extraction_timeout: config.extraction_timeout,
        })
    }

    pub fn gallery(&self) -> &GalleryCache<Arc<P>> {
        &self.gallery
    }

    pub fn matcher(&self) -> &EuclideanMatcher {
        &self.matcher
    }

    /// Current gallery snapshot, rebuilt if the directory changed.
    pub async fn snapshot(&self) -> Result<Arc<GallerySnapshot>, MatchError> {
        self.gallery.snapshot().await
    }

    /// Identify which gallery identities appear in `image`.
    ///
    /// Query faces are extracted before the gallery is consulted, so an image
    /// without faces is [`MatchError::NoFacesDetected`] whatever the gallery
    /// state.
    pub async fn match_image(&self, image: &[u8]) -> Result<QueryResult, MatchError> {
        let started = Instant::now();

        let faces = extract_with_timeout(&*self.provider, image, self.extraction_timeout).await?;
        if faces.is_empty() {
            tracing::debug!(bytes = image.len(), "no faces in query image");
            return Err(MatchError::NoFacesDetected);
        }

        let snapshot = self.gallery.snapshot().await?;
        let report = self.matcher.compare(&faces, &snapshot)?;
        let result = aggregate(report, &snapshot)?;

        tracing::info!(
            faces = result.faces.len(),
            outcome = ?result.outcome,
            identities = ?result.identities,
            comparisons = result.comparisons,
            gallery = %snapshot.fingerprint(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "match complete"
        );

        Ok(result)
    }
}
