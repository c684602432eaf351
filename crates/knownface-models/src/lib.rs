//! knownface-models: ONNX-backed embedding provider.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition, both
//! running via ONNX Runtime on a dedicated engine thread.

pub mod alignment;
pub mod detector;
pub mod engine;
pub mod recognizer;

pub use detector::{DetectorError, FaceDetector};
pub use engine::{
    default_model_dir, spawn_engine, spawn_engine_from_dir, EngineError, EngineHandle,
    DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE,
};
pub use recognizer::{FaceRecognizer, RecognizerError, ARCFACE_DISTANCE_THRESHOLD};
