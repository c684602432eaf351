use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use knownface_core::{DetectedFace, EmbeddingProvider, ProviderError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

const ENGINE_QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<EngineError> for ProviderError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Decode(e) => ProviderError::Decode(e.to_string()),
            EngineError::Detector(e) => ProviderError::Inference(e.to_string()),
            EngineError::Recognizer(e) => ProviderError::Inference(e.to_string()),
            EngineError::Spawn(_) | EngineError::ChannelClosed => ProviderError::Unavailable,
        }
    }
}

/// Model directory under `$XDG_DATA_HOME/knownface/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("knownface")
        .join("models")
}

/// Request sent to the engine thread.
struct ExtractRequest {
    image: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<ExtractRequest>,
    model_version: Arc<str>,
}

impl EngineHandle {
    /// Decode `image`, detect every face and embed each one.
    pub async fn extract_faces(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ExtractRequest {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

impl EmbeddingProvider for EngineHandle {
    fn model_version(&self) -> &str {
        &self.model_version
    }

    fn extract(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Vec<DetectedFace>, ProviderError>> + Send {
        let image = image.to_vec();
        async move { self.extract_faces(image).await.map_err(ProviderError::from) }
    }
}

/// Spawn the engine with `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
pub fn spawn_engine_from_dir(model_dir: &Path) -> Result<EngineHandle, EngineError> {
    spawn_engine(
        &model_dir.join(DETECTOR_MODEL_FILE),
        &model_dir.join(RECOGNIZER_MODEL_FILE),
    )
}

/// Spawn the engine on a dedicated OS thread.
///
/// Both ONNX sessions are loaded before the thread starts, so a missing or
/// broken model fails here rather than on the first request. The thread exits
/// once every handle is dropped.
pub fn spawn_engine(detector_path: &Path, recognizer_path: &Path) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(detector_path)?;
    let mut recognizer = FaceRecognizer::load(recognizer_path)?;
    let model_version: Arc<str> = Arc::from(recognizer.model_version());

    let (tx, mut rx) = mpsc::channel::<ExtractRequest>(ENGINE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("knownface-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let result = run_extract(&mut detector, &mut recognizer, &req.image);
                // The caller may have timed out; its reply is simply dropped.
                let _ = req.reply.send(result);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, model_version })
}

fn run_extract(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    bytes: &[u8],
) -> Result<Vec<DetectedFace>, EngineError> {
    let started = Instant::now();
    let image = image::load_from_memory(bytes)?.to_rgb8();
    let regions = detector.detect(&image)?;

    let mut faces = Vec::with_capacity(regions.len());
    for region in regions {
        if region.landmarks.is_none() {
            tracing::debug!(confidence = region.confidence, "skipping face without landmarks");
            continue;
        }
        let embedding = recognizer.embed(&image, &region)?;
        faces.push(DetectedFace::new(region, embedding));
    }

    tracing::debug!(
        width = image.width(),
        height = image.height(),
        faces = faces.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "extracted faces"
    );

    Ok(faces)
}
