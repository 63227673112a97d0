//! YOLO plate detector using ONNX Runtime via `ort`.
//!
//! Handles letterbox preprocessing, inference on a single-output YOLOv8-style
//! head (`[1, 4 + classes, anchors]` or its transpose), and class-aware NMS.

use std::path::Path;

use crate::frame::Frame;
use crate::models::{ModelError, ObjectDetection, ObjectDetector};
use crate::types::PixelBox;

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Raw score floor before NMS. Callers apply their own, stricter threshold.
const MIN_CONFIDENCE: f32 = 0.25;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f32 = 0.45;

/// YOLO letterbox fill (114/255 gray).
const PAD_VALUE: f32 = 114.0 / 255.0;

pub struct YoloPlateDetector {
    session: ort::session::Session,
    input_size: u32,
}

impl YoloPlateDetector {
    /// Load a YOLO ONNX model.
    ///
    /// The input resolution is read from the model's input shape (expecting NCHW).
    /// Falls back to 640 if the shape is dynamic or unreadable.
    pub fn load(model_path: &str) -> Result<Self, ModelError> {
        if !Path::new(model_path).exists() {
            return Err(ModelError::ModelNotFound(model_path.to_string()));
        }

        let session = ort::session::Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    if shape.len() >= 4 && shape[2] > 0 {
                        Some(shape[2] as u32)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        tracing::info!(path = model_path, input_size, "loaded YOLO plate model");

        Ok(Self { session, input_size })
    }
}

impl ObjectDetector for YoloPlateDetector {
    fn detect(&mut self, bgr: &Frame) -> Result<Vec<ObjectDetection>, ModelError> {
        let (input_tensor, letterbox) = letterbox(bgr, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err(ModelError::InferenceFailed("YOLO model produced no outputs".into()));
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        let data: Vec<f32> = tensor.iter().copied().collect();

        let raw = decode_output(&data, &shape, &letterbox)?;
        let kept = nms(raw, NMS_IOU_THRESH);

        Ok(kept
            .into_iter()
            .map(|d| ObjectDetection {
                bbox: PixelBox::from_edges(d.x1, d.y1, d.x2, d.y2, bgr.width(), bgr.height()),
                confidence: d.confidence,
                class_id: d.class_id,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

#[derive(Debug, Clone, Copy)]
struct RawDetection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
    class_id: usize,
}

/// Letterbox-resize a BGR frame into an RGB NCHW tensor scaled to [0, 1].
fn letterbox(bgr: &Frame, target_size: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = bgr.width() as f32;
    let fh = bgr.height() as f32;
    let target = target_size as f32;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).clamp(1, target_size);
    let new_h = ((fh * scale).round() as u32).clamp(1, target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let mut tensor = ndarray::Array4::<f32>::from_elem(
        (1, 3, target_size as usize, target_size as usize),
        PAD_VALUE,
    );

    let src_w = bgr.width() as usize;
    let src_h = bgr.height() as usize;

    // Nearest-neighbor resize + copy into padded region, BGR -> RGB.
    for y in 0..new_h as usize {
        let src_y = ((y as f32 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f32 / scale) as usize).min(src_w - 1);
            let [b, g, r] = bgr.pixel(src_x, src_y);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            tensor[[0, 0, ty, tx]] = r as f32 / 255.0;
            tensor[[0, 1, ty, tx]] = g as f32 / 255.0;
            tensor[[0, 2, ty, tx]] = b as f32 / 255.0;
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Parse a `[1, features, anchors]` (or transposed) YOLO head into frame-space boxes.
///
/// Each row is `[cx, cy, w, h, class_0, class_1, ...]`; the best class wins.
fn decode_output(
    data: &[f32],
    shape: &[usize],
    letterbox: &Letterbox,
) -> Result<Vec<RawDetection>, ModelError> {
    if shape.len() != 3 {
        return Err(ModelError::InferenceFailed(format!(
            "unexpected YOLO output shape: {shape:?}"
        )));
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if num_feats < 5 || data.len() < num_dets * num_feats {
        return Err(ModelError::InferenceFailed(format!(
            "YOLO output too small for shape {shape:?}"
        )));
    }

    let at = |det: usize, feat: usize| -> f32 {
        if transposed {
            data[feat * num_dets + det]
        } else {
            data[det * num_feats + feat]
        }
    };

    let mut detections = Vec::new();
    for i in 0..num_dets {
        let (class_id, confidence) = (4..num_feats)
            .map(|f| (f - 4, at(i, f)))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
        if confidence < MIN_CONFIDENCE {
            continue;
        }

        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        detections.push(RawDetection {
            x1: (cx - w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y1: (cy - h / 2.0 - letterbox.pad_y) / letterbox.scale,
            x2: (cx + w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y2: (cy + h / 2.0 - letterbox.pad_y) / letterbox.scale,
            confidence,
            class_id,
        });
    }
    Ok(detections)
}

/// Class-aware NMS. Output is sorted by descending confidence.
fn nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in detections {
        let overlaps = keep
            .iter()
            .any(|k| k.class_id == det.class_id && iou(k, &det) > iou_threshold);
        if !overlaps {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
