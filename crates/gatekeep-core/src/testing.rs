//! Scripted model fakes shared by the unit tests.
//!
//! Test frames from [`frame`] encode position in their pixels (red = x / 10,
//! green = y / 10), so fakes can tell regions apart without knowing the boxes.

use crate::frame::Frame;
use crate::models::{
    FaceEncoder, FaceLocator, LocateOptions, ModelError, ObjectDetection, ObjectDetector,
    TextRecognizer, TextSpan,
};
use crate::registry::RegistrySnapshot;
use crate::types::{BoundingBox, Encoding, PixelBox, UserRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub fn frame(width: u32, height: u32) -> Frame {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[(x / 10) as u8, (y / 10) as u8, 0]);
        }
    }
    Frame::from_rgb(data, width, height).unwrap()
}

/// Square face box with landmarks, keyed for [`FakeEncoder`] by its `x`.
pub fn face_box(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width: size,
        height: size,
        confidence,
        landmarks: Some([(x, y); 5]),
    }
}

pub fn pixel_box(left: i32, top: i32, right: i32, bottom: i32) -> PixelBox {
    PixelBox { left, top, right, bottom }
}

pub fn record(name: &str, encoding: Vec<f32>, plate: &str) -> UserRecord {
    UserRecord {
        name: name.to_string(),
        face_encoding: Encoding::new(encoding),
        plate_number: plate.to_string(),
        registered_at: chrono::Utc::now(),
    }
}

pub fn snapshot(records: Vec<UserRecord>) -> RegistrySnapshot {
    Arc::new(records.into_iter().map(|r| (r.name.clone(), r)).collect())
}

pub struct FakeLocator {
    boxes: Option<Vec<BoundingBox>>,
    seen: Arc<Mutex<Vec<LocateOptions>>>,
}

impl FakeLocator {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self {
            boxes: Some(boxes),
            seen: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            boxes: None,
            seen: Arc::default(),
        }
    }

    /// Options of every `locate` call, in order.
    pub fn seen_options(&self) -> Arc<Mutex<Vec<LocateOptions>>> {
        self.seen.clone()
    }
}

impl FaceLocator for FakeLocator {
    fn locate(&mut self, _frame: &Frame, options: LocateOptions) -> Result<Vec<BoundingBox>, ModelError> {
        self.seen.lock().unwrap().push(options);
        self.boxes
            .clone()
            .ok_or_else(|| ModelError::InferenceFailed("fake locator failure".into()))
    }
}

/// Returns the encoding registered for each box's `x`; unknown boxes get a far-away vector.
#[derive(Default)]
pub struct FakeEncoder {
    by_x: HashMap<i32, Vec<f32>>,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, x: i32, values: Vec<f32>) -> Self {
        self.by_x.insert(x, values);
        self
    }
}

impl FaceEncoder for FakeEncoder {
    fn encode(&mut self, _frame: &Frame, faces: &[BoundingBox]) -> Result<Vec<Encoding>, ModelError> {
        Ok(faces
            .iter()
            .map(|f| {
                let values = self
                    .by_x
                    .get(&(f.x as i32))
                    .cloned()
                    .unwrap_or_else(|| vec![1000.0, 1000.0]);
                Encoding::new(values)
            })
            .collect())
    }
}

pub struct FakeDetector {
    detections: Option<Vec<ObjectDetection>>,
}

impl FakeDetector {
    pub fn new(detections: Vec<ObjectDetection>) -> Self {
        Self {
            detections: Some(detections),
        }
    }

    pub fn failing() -> Self {
        Self { detections: None }
    }
}

impl ObjectDetector for FakeDetector {
    fn detect(&mut self, _bgr: &Frame) -> Result<Vec<ObjectDetection>, ModelError> {
        self.detections
            .clone()
            .ok_or_else(|| ModelError::InferenceFailed("fake detector failure".into()))
    }
}

/// Answers by the crop's left edge (recovered from the red channel of [`frame`]).
#[derive(Default)]
pub struct FakeRecognizer {
    by_left: HashMap<i32, Option<Vec<String>>>,
}

impl FakeRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, left: i32, texts: &[&str]) -> Self {
        self.by_left
            .insert(left, Some(texts.iter().map(|t| t.to_string()).collect()));
        self
    }

    pub fn failing_at(mut self, left: i32) -> Self {
        self.by_left.insert(left, None);
        self
    }
}

impl TextRecognizer for FakeRecognizer {
    fn recognize(&mut self, crop: &Frame) -> Result<Vec<TextSpan>, ModelError> {
        let left = crop.pixel(0, 0)[0] as i32 * 10;
        match self.by_left.get(&left) {
            Some(Some(texts)) => Ok(texts
                .iter()
                .map(|text| TextSpan {
                    bbox: pixel_box(0, 0, crop.width() as i32, crop.height() as i32),
                    text: text.clone(),
                    confidence: 0.9,
                })
                .collect()),
            Some(None) => Err(ModelError::InferenceFailed("fake OCR failure".into())),
            None => Ok(Vec::new()),
        }
    }
}
