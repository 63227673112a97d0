//! Model seams: the four pretrained capabilities the pipeline depends on.
//!
//! The ONNX-backed implementations live in [`crate::detector`],
//! [`crate::recognizer`], [`crate::plate_detector`] and [`crate::ocr`].
//! Tests substitute scripted fakes.

use crate::frame::Frame;
use crate::types::{BoundingBox, Encoding, PixelBox};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — locator must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Accuracy/speed trade-off for face localization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionMode {
    #[default]
    Fast,
    Accurate,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Fast => "fast",
            DetectionMode::Accurate => "accurate",
        }
    }
}

impl std::str::FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" | "hog" => Ok(DetectionMode::Fast),
            "accurate" | "cnn" => Ok(DetectionMode::Accurate),
            other => Err(format!("unknown detection mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateOptions {
    pub mode: DetectionMode,
    /// Higher = more sensitive to small faces, slower.
    pub upsample: u32,
}

/// Finds faces in an RGB frame.
pub trait FaceLocator: Send {
    fn locate(&mut self, frame: &Frame, options: LocateOptions)
        -> Result<Vec<BoundingBox>, ModelError>;
}

/// Computes one encoding per located face.
pub trait FaceEncoder: Send {
    fn encode(&mut self, frame: &Frame, faces: &[BoundingBox]) -> Result<Vec<Encoding>, ModelError>;
}

/// A raw object-detector hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetection {
    pub bbox: PixelBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// Finds objects in a BGR frame.
pub trait ObjectDetector: Send {
    fn detect(&mut self, bgr: &Frame) -> Result<Vec<ObjectDetection>, ModelError>;
}

/// A span of recognized text within a crop.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub bbox: PixelBox,
    pub text: String,
    pub confidence: f32,
}

/// Reads text from a cropped region.
pub trait TextRecognizer: Send {
    fn recognize(&mut self, crop: &Frame) -> Result<Vec<TextSpan>, ModelError>;
}
