//! Gallery cache: enrolled identities and their reference embeddings.
//!
//! Reference images are read from a directory. Files directly inside it are
//! one identity each, named by file name. Each subdirectory is one identity
//! named by the directory, pooling every reference image inside it.
//!
//! The cache hands out immutable [`GallerySnapshot`]s behind an `Arc`. A
//! snapshot is rebuilt only when the directory [`Fingerprint`] changes, at most
//! one rebuild runs at a time, and a rebuild only re-extracts files whose size
//! or modification time changed since the previous snapshot.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use crate::error::MatchError;
use crate::provider::{extract_with_timeout, EmbeddingProvider};
use crate::types::Embedding;

/// File extensions accepted as reference images (compared case-insensitively).
pub const REFERENCE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "bmp", "webp", "gif", "tif", "tiff"];

const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Size and modification time of a reference file, as seen by one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceStamp {
    len: u64,
    modified_nanos: u128,
}

/// One reference image found while scanning the gallery directory.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub path: PathBuf,
    /// Path relative to the gallery root, used in the fingerprint.
    pub relative: PathBuf,
    pub identity: String,
    stamp: SourceStamp,
}

/// Digest of the gallery directory listing (relative path, size, mtime).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(sources: &[ReferenceImage]) -> Self {
        let mut hasher = Sha256::new();
        for source in sources {
            hasher.update(source.relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(source.stamp.len.to_le_bytes());
            hasher.update(source.stamp.modified_nanos.to_le_bytes());
            hasher.update([b'\n']);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An enrolled identity. Never stored without at least one embedding.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryEntry {
    pub id: String,
    #[serde(skip)]
    pub embeddings: Vec<Embedding>,
    /// Reference files that contributed at least one embedding.
    pub sources: Vec<PathBuf>,
}

impl GalleryEntry {
    pub fn new(id: impl Into<String>, embeddings: Vec<Embedding>) -> Self {
        Self {
            id: id.into(),
            embeddings,
            sources: Vec::new(),
        }
    }
}

/// Why a reference image did not contribute to the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    NoFace,
    Unreadable(String),
    ExtractionFailed(String),
    ExtractionTimeout,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoFace => f.write_str("no face detected"),
            SkipReason::Unreadable(e) => write!(f, "unreadable: {e}"),
            SkipReason::ExtractionFailed(e) => write!(f, "extraction failed: {e}"),
            SkipReason::ExtractionTimeout => f.write_str("extraction timed out"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedReference {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Immutable point-in-time view of the gallery.
#[derive(Debug, Clone)]
pub struct GallerySnapshot {
    fingerprint: Fingerprint,
    entries: Vec<GalleryEntry>,
    skipped: Vec<SkippedReference>,
    model_version: String,
    /// Extraction results keyed by reference path, reused by the next rebuild
    /// for files whose stamp is unchanged. Failed extractions are not kept.
    extracted: HashMap<PathBuf, (SourceStamp, Vec<Embedding>)>,
}

impl GallerySnapshot {
    /// Build a snapshot from in-memory entries, dropping any without embeddings.
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        let entries: Vec<GalleryEntry> = entries
            .into_iter()
            .filter(|e| !e.embeddings.is_empty())
            .collect();

        let mut hasher = Sha256::new();
        for entry in &entries {
            hasher.update(entry.id.as_bytes());
            hasher.update([0u8]);
        }

        Self {
            fingerprint: Fingerprint(format!("{:x}", hasher.finalize())),
            entries,
            skipped: Vec::new(),
            model_version: String::new(),
            extracted: HashMap::new(),
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn skipped(&self) -> &[SkippedReference] {
        &self.skipped
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of reference embeddings across all entries.
    pub fn embedding_count(&self) -> usize {
        self.entries.iter().map(|e| e.embeddings.len()).sum()
    }

    pub fn entry(&self, id: &str) -> Option<&GalleryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn summary(&self) -> GallerySummary {
        GallerySummary {
            fingerprint: self.fingerprint.clone(),
            model_version: self.model_version.clone(),
            entries: self.entries.len(),
            embeddings: self.embedding_count(),
            skipped: self.skipped.clone(),
        }
    }

    fn reusable(&self, source: &ReferenceImage) -> Option<&[Embedding]> {
        match self.extracted.get(&source.path) {
            Some((stamp, embeddings)) if *stamp == source.stamp => Some(embeddings),
            _ => None,
        }
    }
}

/// Serializable description of the snapshot a result was computed against.
#[derive(Debug, Clone, Serialize)]
pub struct GallerySummary {
    pub fingerprint: Fingerprint,
    pub model_version: String,
    pub entries: usize,
    pub embeddings: usize,
    pub skipped: Vec<SkippedReference>,
}

/// Lazily built, fingerprint-invalidated gallery of reference embeddings.
pub struct GalleryCache<P> {
    root: PathBuf,
    provider: P,
    extraction_timeout: Duration,
    current: RwLock<Option<Arc<GallerySnapshot>>>,
    rebuild: Mutex<()>,
}

impl<P: EmbeddingProvider> GalleryCache<P> {
    pub fn new(root: impl Into<PathBuf>, provider: P) -> Self {
        Self {
            root: root.into(),
            provider,
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
            current: RwLock::new(None),
            rebuild: Mutex::new(()),
        }
    }

    /// Deadline applied to each reference image extraction during a rebuild.
    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The cached snapshot, if any, without checking the directory.
    pub async fn current(&self) -> Option<Arc<GallerySnapshot>> {
        self.current.read().await.clone()
    }

    /// Drop the cached snapshot; the next [`snapshot`](Self::snapshot) call
    /// re-extracts every reference image.
    pub async fn invalidate(&self) {
        let _guard = self.rebuild.lock().await;
        *self.current.write().await = None;
        tracing::info!(root = %self.root.display(), "gallery cache invalidated");
    }

    /// Return a snapshot matching the directory's current fingerprint,
    /// rebuilding it first if needed.
    pub async fn snapshot(&self) -> Result<Arc<GallerySnapshot>, MatchError> {
        let sources = scan(&self.root).await?;
        let fingerprint = Fingerprint::of(&sources);
        if let Some(snapshot) = self.cached(&fingerprint).await {
            return self.usable(snapshot);
        }

        let _guard = self.rebuild.lock().await;

        // Re-scan: a rebuild may have completed while this caller waited.
        let sources = scan(&self.root).await?;
        let fingerprint = Fingerprint::of(&sources);
        if let Some(snapshot) = self.cached(&fingerprint).await {
            return self.usable(snapshot);
        }

        let previous = self.current().await;
        let snapshot = Arc::new(self.build(sources, fingerprint, previous.as_deref()).await);
        *self.current.write().await = Some(Arc::clone(&snapshot));

        self.usable(snapshot)
    }

    async fn cached(&self, fingerprint: &Fingerprint) -> Option<Arc<GallerySnapshot>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|s| s.fingerprint == *fingerprint)
            .cloned()
    }

    fn usable(&self, snapshot: Arc<GallerySnapshot>) -> Result<Arc<GallerySnapshot>, MatchError> {
        if snapshot.is_empty() {
            return Err(MatchError::GalleryEmpty {
                path: self.root.clone(),
                skipped: snapshot.skipped.len(),
            });
        }
        Ok(snapshot)
    }

    async fn build(
        &self,
        sources: Vec<ReferenceImage>,
        fingerprint: Fingerprint,
        previous: Option<&GallerySnapshot>,
    ) -> GallerySnapshot {
        let started = Instant::now();
        let total = sources.len();
        let mut reused = 0usize;
        let mut extracted = HashMap::with_capacity(total);
        let mut entries: BTreeMap<String, GalleryEntry> = BTreeMap::new();
        let mut skipped = Vec::new();

        for source in sources {
            let embeddings = match previous.and_then(|p| p.reusable(&source)) {
                Some(embeddings) => {
                    reused += 1;
                    embeddings.to_vec()
                }
                None => match self.extract_reference(&source).await {
                    Ok(embeddings) => embeddings,
                    Err(reason) => {
                        tracing::warn!(
                            path = %source.path.display(),
                            identity = %source.identity,
                            %reason,
                            "skipping reference image"
                        );
                        skipped.push(SkippedReference {
                            path: source.path,
                            reason,
                        });
                        continue;
                    }
                },
            };

            extracted.insert(source.path.clone(), (source.stamp, embeddings.clone()));

            if embeddings.is_empty() {
                tracing::warn!(
                    path = %source.path.display(),
                    identity = %source.identity,
                    "no face in reference image; excluded from gallery"
                );
                skipped.push(SkippedReference {
                    path: source.path,
                    reason: SkipReason::NoFace,
                });
                continue;
            }

            let entry = entries
                .entry(source.identity.clone())
                .or_insert_with(|| GalleryEntry::new(source.identity.clone(), Vec::new()));
            entry.embeddings.extend(embeddings);
            entry.sources.push(source.path);
        }

        let snapshot = GallerySnapshot {
            fingerprint,
            entries: entries.into_values().collect(),
            skipped,
            model_version: self.provider.model_version().to_string(),
            extracted,
        };

        tracing::info!(
            root = %self.root.display(),
            fingerprint = %snapshot.fingerprint,
            references = total,
            reused,
            entries = snapshot.len(),
            embeddings = snapshot.embedding_count(),
            skipped = snapshot.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "gallery snapshot built"
        );

        snapshot
    }

    async fn extract_reference(&self, source: &ReferenceImage) -> Result<Vec<Embedding>, SkipReason> {
        let bytes = tokio::fs::read(&source.path)
            .await
            .map_err(|e| SkipReason::Unreadable(e.to_string()))?;

        match extract_with_timeout(&self.provider, &bytes, self.extraction_timeout).await {
            Ok(faces) => {
                tracing::debug!(
                    path = %source.path.display(),
                    faces = faces.len(),
                    "extracted reference faces"
                );
                Ok(faces.into_iter().map(|f| f.embedding).collect())
            }
            Err(MatchError::ExtractionTimeout(_)) => Err(SkipReason::ExtractionTimeout),
            Err(e) => Err(SkipReason::ExtractionFailed(e.to_string())),
        }
    }
}

/// List the reference images under `root`, sorted by path.
pub async fn scan(root: &Path) -> Result<Vec<ReferenceImage>, MatchError> {
    let root_owned = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan_blocking(&root_owned))
        .await
        .map_err(|e| MatchError::GalleryUnavailable {
            path: root.to_path_buf(),
            reason: format!("scan task failed: {e}"),
        })?
}

fn scan_blocking(root: &Path) -> Result<Vec<ReferenceImage>, MatchError> {
    let unavailable = |reason: String| MatchError::GalleryUnavailable {
        path: root.to_path_buf(),
        reason,
    };

    if !root.is_dir() {
        let reason = if root.exists() {
            "not a directory"
        } else {
            "directory not found"
        };
        return Err(unavailable(reason.to_string()));
    }

    let mut sources = Vec::new();
    let listing = std::fs::read_dir(root).map_err(|e| unavailable(e.to_string()))?;

    for dirent in listing {
        let dirent = dirent.map_err(|e| unavailable(e.to_string()))?;
        let path = dirent.path();
        let Some(name) = visible_name(&path) else {
            continue;
        };

        if path.is_dir() {
            let Ok(inner) = std::fs::read_dir(&path) else {
                tracing::warn!(path = %path.display(), "cannot read identity directory; ignoring");
                continue;
            };
            for inner in inner.flatten() {
                let inner_path = inner.path();
                if visible_name(&inner_path).is_some() && is_reference_image(&inner_path) {
                    push_source(&mut sources, root, inner_path, name.clone());
                }
            }
        } else if is_reference_image(&path) {
            push_source(&mut sources, root, path, name);
        }
    }

    sources.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(sources)
}

fn push_source(sources: &mut Vec<ReferenceImage>, root: &Path, path: PathBuf, identity: String) {
    let Ok(metadata) = std::fs::metadata(&path) else {
        tracing::warn!(path = %path.display(), "cannot stat reference image; ignoring");
        return;
    };
    if !metadata.is_file() {
        return;
    }

    let modified_nanos = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let relative = path.strip_prefix(root).map(Path::to_path_buf).unwrap_or_else(|_| path.clone());

    sources.push(ReferenceImage {
        path,
        relative,
        identity,
        stamp: SourceStamp {
            len: metadata.len(),
            modified_nanos,
        },
    });
}

fn visible_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    (!name.starts_with('.')).then_some(name)
}

fn is_reference_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| REFERENCE_EXTENSIONS.contains(&ext.as_str()))
}
