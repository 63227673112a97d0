//! SCRFD face locator via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing.

use crate::frame::Frame;
use crate::models::{DetectionMode, FaceLocator, LocateOptions, ModelError};
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- Named constants (no magic numbers) ---
const SCRFD_FAST_INPUT_SIZE: usize = 480;
const SCRFD_ACCURATE_INPUT_SIZE: usize = 640;
const SCRFD_MAX_INPUT_SIZE: usize = 1280;
const SCRFD_INPUT_ALIGN: usize = 32;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face locator.
pub struct ScrfdLocator {
    session: Session,
    /// Square input side baked into the model, if the export is not dynamic.
    fixed_input: Option<usize>,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdLocator {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ModelError> {
        if !Path::new(model_path).exists() {
            return Err(ModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        let fixed_input = session.inputs().first().and_then(|input| {
            if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                if shape.len() >= 4 && shape[2] > 0 {
                    return Some(shape[2] as usize);
                }
            }
            None
        });

        tracing::info!(
            path = model_path,
            ?fixed_input,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if num_outputs < 9 {
            return Err(ModelError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            fixed_input,
            stride_indices,
        })
    }

    fn input_size(&self, options: LocateOptions) -> usize {
        match self.fixed_input {
            Some(size) => size,
            None => input_size_for(options),
        }
    }

    /// Preprocess an RGB frame into a NCHW float tensor with letterbox padding.
    fn preprocess(frame: &Frame, input_size: usize) -> (Array4<f32>, LetterboxInfo) {
        let width = frame.width() as usize;
        let height = frame.height() as usize;

        let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, input_size);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, input_size);
        let pad_x = (input_size - new_w) as f32 / 2.0;
        let pad_y = (input_size - new_h) as f32 / 2.0;

        let letterbox = LetterboxInfo { scale, pad_x, pad_y };

        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;

        // Pad value SCRFD_MEAN normalizes to 0.0
        let mut tensor = Array4::<f32>::zeros((1, 3, input_size, input_size));
        let inv_scale = 1.0 / scale;

        for y in 0..new_h {
            let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
            let y1 = (y0 + 1).min(height - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..new_w {
                let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
                let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
                let x1 = (x0 + 1).min(width - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                let tl = frame.pixel(x0, y0);
                let tr = frame.pixel(x1, y0);
                let bl = frame.pixel(x0, y1);
                let br = frame.pixel(x1, y1);

                for c in 0..3 {
                    let val = tl[c] as f32 * (1.0 - fx) * (1.0 - fy)
                        + tr[c] as f32 * fx * (1.0 - fy)
                        + bl[c] as f32 * (1.0 - fx) * fy
                        + br[c] as f32 * fx * fy;
                    tensor[[0, c, y + pad_y_start, x + pad_x_start]] = (val - SCRFD_MEAN) / SCRFD_STD;
                }
            }
        }

        (tensor, letterbox)
    }
}

impl FaceLocator for ScrfdLocator {
    /// Locate faces in an RGB frame, returning bounding boxes sorted by confidence.
    fn locate(
        &mut self,
        frame: &Frame,
        options: LocateOptions,
    ) -> Result<Vec<BoundingBox>, ModelError> {
        let input_size = self.input_size(options);
        let (input, letterbox) = Self::preprocess(frame, input_size);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            let stride_outputs = StrideOutputs { scores, bboxes, kps };
            all_detections.extend(decode_stride(
                &stride_outputs,
                stride,
                input_size,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let result = nms(all_detections, SCRFD_NMS_THRESHOLD);

        tracing::debug!(
            faces = result.len(),
            input_size,
            upsample = options.upsample,
            "SCRFD locate"
        );

        Ok(result)
    }
}

/// Model input side for a locate request: the mode's base resolution scaled
/// by the upsample factor, aligned to the coarsest stride and capped.
fn input_size_for(options: LocateOptions) -> usize {
    let base = match options.mode {
        DetectionMode::Fast => SCRFD_FAST_INPUT_SIZE,
        DetectionMode::Accurate => SCRFD_ACCURATE_INPUT_SIZE,
    };
    let size = (base * options.upsample.max(1) as usize).min(SCRFD_MAX_INPUT_SIZE);
    size / SCRFD_INPUT_ALIGN * SCRFD_INPUT_ALIGN
}

/// Map each stride to its (score, bbox, kps) output tensors.
///
/// Exports that name their outputs `score_8`, `bbox_16`, `kps_32`, ... are
/// mapped by name in any order. Anything else gets the stock positional
/// layout: scores for strides 8/16/32 first, then bboxes, then keypoints.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let position = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some((
                position("score", stride)?,
                position("bbox", stride)?,
                position("kps", stride)?,
            ))
        })
        .collect();

    match named.and_then(|v| <[StrideOutputIndices; 3]>::try_from(v).ok()) {
        Some(indices) => {
            tracing::info!("SCRFD: output tensors mapped by name");
            indices
        }
        None => {
            tracing::info!(?names, "SCRFD: unrecognized output names, using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

impl LetterboxInfo {
    /// Map a point in model input space back onto the source frame.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Raw output tensors for one stride level.
struct StrideOutputs<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode every anchor of one stride level that scores above `threshold`.
///
/// Anchors are laid out row-major over a square `input_size / stride` grid,
/// [`SCRFD_ANCHORS_PER_CELL`] per cell. Box and keypoint offsets are in
/// stride units from the cell's top-left corner.
fn decode_stride(
    outputs: &StrideOutputs<'_>,
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *outputs.scores.get(idx)?;
            if score <= threshold {
                return None;
            }

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            let d = outputs.bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

            let landmarks = outputs.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
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

/// Greedy non-maximum suppression. Output is sorted by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(candidates.len());
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
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
