//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB image to 640×640, decodes the three anchor-free stride
//! heads (8, 16, 32) into boxes with five landmarks, then applies NMS.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbImage;
use knownface_core::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {} (download det_10g.onnx from insightface)", .0.display())]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting the image into the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    width: u32,
    height: u32,
}

impl Letterbox {
    fn fit(src_width: u32, src_height: u32, input: u32) -> Self {
        let scale = (input as f32 / src_width as f32).min(input as f32 / src_height as f32);
        let width = ((src_width as f32 * scale).round() as u32).clamp(1, input);
        let height = ((src_height as f32 * scale).round() as u32).clamp(1, input);
        Self {
            scale,
            pad_x: (input - width) as f32 / 2.0,
            pad_y: (input - height) as f32 / 2.0,
            width,
            height,
        }
    }

    /// Map a point in model input space back to the source image.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideSlots {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Raw head outputs for one stride level.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    layout: [StrideSlots; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let layout = output_layout(&output_names);
        tracing::debug!(?layout, "SCRFD output tensor layout");

        Ok(Self { session, layout })
    }

    /// Detect faces, returning boxes with landmarks sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slots, &stride) in self.layout.iter().zip(SCRFD_STRIDES.iter()) {
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let head = StrideOutputs {
                stride,
                scores: tensor(slots.score, "scores")?,
                bboxes: tensor(slots.bbox, "bboxes")?,
                kps: tensor(slots.kps, "kps")?,
            };
            candidates.extend(decode_stride(&head, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Resize into the letterboxed NCHW RGB tensor; padding normalizes to 0.0.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);
    let resized = imageops::resize(image, letterbox.width, letterbox.height, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (off_x, off_y) = (letterbox.pad_x.floor() as usize, letterbox.pad_y.floor() as usize);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Find the score/bbox/kps outputs for each stride.
///
/// Exports that name tensors `score_8`, `bbox_16`, `kps_32`, ... are mapped by
/// name in any order; anything else uses the standard positional layout
/// `[scores 8/16/32, bboxes 8/16/32, kps 8/16/32]`.
fn output_layout(names: &[String]) -> [StrideSlots; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named = |stride: usize| {
        Some(StrideSlots {
            score: position("score", stride)?,
            bbox: position("bbox", stride)?,
            kps: position("kps", stride)?,
        })
    };

    match (named(8), named(16), named(32)) {
        (Some(s8), Some(s16), Some(s32)) => [s8, s16, s32],
        _ => {
            tracing::debug!(?names, "SCRFD output names not recognized; using positional layout");
            std::array::from_fn(|i| StrideSlots {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Decode anchors above `threshold` for one stride into source-image boxes.
fn decode_stride(head: &StrideOutputs<'_>, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let stride = head.stride as f32;
    let grid_w = SCRFD_INPUT_SIZE as usize / head.stride;

    head.scores
        .iter()
        .enumerate()
        .filter(|(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * stride;
            let cy = (cell / grid_w) as f32 * stride;

            let d = head.bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(cx - d[0] * stride, cy - d[1] * stride);
            let (x2, y2) = letterbox.unmap(cx + d[2] * stride, cy + d[3] * stride);

            let landmarks = head.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(cx + k[i * 2] * stride, cy + k[i * 2 + 1] * stride))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest confidence first.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let overlap_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = overlap_w * overlap_h;
    let union = a.area() + b.area() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
