//! knownface-core: embedding-based identity matching.
//!
//! Compares face embeddings from a query image against a cached gallery of
//! reference embeddings. Detection and embedding inference are supplied by an
//! [`EmbeddingProvider`]; this crate never touches a model.

pub mod aggregate;
pub mod error;
pub mod gallery;
pub mod matcher;
pub mod provider;
pub mod service;
pub mod types;

pub use aggregate::{aggregate, Outcome, QueryResult};
pub use error::{FailureClass, MatchError};
pub use gallery::{
    Fingerprint, GalleryCache, GalleryEntry, GallerySnapshot, GallerySummary, SkipReason,
    SkippedReference,
};
pub use matcher::{
    EuclideanMatcher, FaceMatches, IdentityMatch, MatchReport, Matcher, DEFAULT_DISTANCE_THRESHOLD,
};
pub use provider::{EmbeddingProvider, ProviderError};
pub use service::{FaceMatchService, MatchConfig};
pub use types::{BoundingBox, DetectedFace, Embedding};
