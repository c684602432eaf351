#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use knownface_core::{BoundingBox, DetectedFace, Embedding, EmbeddingProvider, ProviderError};

/// Content that makes the fake provider hang until its caller gives up.
pub const SLOW_MARKER: &str = "!slow";

/// Provider that reads faces straight out of the "image" bytes: one face per
/// line, each line a comma-separated embedding. Empty content has no faces;
/// anything unparsable is a decode error.
#[derive(Default)]
pub struct FakeProvider {
    calls: AtomicUsize,
    delay: Duration,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for FakeProvider {
    fn model_version(&self) -> &str {
        "fake-v1"
    }

    fn extract(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Vec<DetectedFace>, ProviderError>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let parsed = parse_faces(image);
        let delay = self.delay;

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let (slow, faces) = parsed?;
            if slow {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(faces)
        }
    }
}

fn parse_faces(image: &[u8]) -> Result<(bool, Vec<DetectedFace>), ProviderError> {
    let text = std::str::from_utf8(image).map_err(|e| ProviderError::Decode(e.to_string()))?;
    let mut slow = false;
    let mut faces = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line == SLOW_MARKER {
            slow = true;
            continue;
        }
        let values = line
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProviderError::Decode(format!("{line:?}: {e}")))?;
        let offset = faces.len() as f32 * 20.0;
        faces.push(DetectedFace::new(
            BoundingBox::new(offset, 0.0, 16.0, 16.0),
            Embedding::with_model_version(values, "fake-v1"),
        ));
    }

    Ok((slow, faces))
}

/// Encode faces the way [`FakeProvider`] reads them.
pub fn image_with_faces(faces: &[&[f32]]) -> Vec<u8> {
    faces
        .iter()
        .map(|f| f.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

pub fn write_reference(dir: &Path, name: &str, faces: &[&[f32]]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, image_with_faces(faces)).unwrap();
    path
}

pub fn write_raw(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
