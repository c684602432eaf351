//! The embedding capability the core consumes.
//!
//! Detection and embedding inference live outside the core. Anything that can
//! turn image bytes into a list of [`DetectedFace`]s can back a
//! [`GalleryCache`](crate::GalleryCache) or a
//! [`FaceMatchService`](crate::FaceMatchService), which keeps tests free of
//! model files.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::error::MatchError;
use crate::types::DetectedFace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("embedding provider is not running")]
    Unavailable,
}

/// Given an image buffer, produce zero or more detected faces.
///
/// Output must be deterministic for a given image and model version.
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the model producing the embeddings.
    fn model_version(&self) -> &str;

    fn extract(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Vec<DetectedFace>, ProviderError>> + Send;
}

impl<P: EmbeddingProvider> EmbeddingProvider for Arc<P> {
    fn model_version(&self) -> &str {
        (**self).model_version()
    }

    fn extract(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Vec<DetectedFace>, ProviderError>> + Send {
        (**self).extract(image)
    }
}

/// Run one extraction under a deadline.
///
/// On expiry the in-flight extraction is dropped and no partial face list is
/// returned.
pub async fn extract_with_timeout<P: EmbeddingProvider>(
    provider: &P,
    image: &[u8],
    timeout: Duration,
) -> Result<Vec<DetectedFace>, MatchError> {
    match tokio::time::timeout(timeout, provider.extract(image)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(MatchError::ExtractionTimeout(timeout)),
    }
}
