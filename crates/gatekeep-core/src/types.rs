use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label given to a face that matched no registered user.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are in source-frame pixels, as produced by the face locator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Round to integer pixel edges, clamped to a `width`×`height` frame.
    pub fn to_pixel_box(&self, width: u32, height: u32) -> PixelBox {
        PixelBox::from_edges(self.x, self.y, self.x + self.width, self.y + self.height, width, height)
    }
}

/// Integer pixel rectangle, edges inclusive-exclusive (`right`/`bottom` are one past the last pixel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelBox {
    /// Build from float edges, rounding and clamping to the frame.
    pub fn from_edges(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        let clamp_x = |v: f32| (v.round() as i32).clamp(0, width as i32);
        let clamp_y = |v: f32| (v.round() as i32).clamp(0, height as i32);
        Self {
            left: clamp_x(x1.min(x2)),
            top: clamp_y(y1.min(y2)),
            right: clamp_x(x1.max(x2)),
            bottom: clamp_y(y1.max(y2)),
        }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Fixed-length face encoding (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two encodings. Smaller = more similar.
    ///
    /// Encodings of different lengths, or empty ones, are infinitely far apart.
    pub fn distance(&self, other: &Encoding) -> f32 {
        if self.is_empty() || self.len() != other.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A registered user: one face encoding and one plate number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub face_encoding: Encoding,
    pub plate_number: String,
    pub registered_at: DateTime<Utc>,
}

/// A face found in a frame and the identity it was matched to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: PixelBox,
    #[serde(skip_serializing)]
    #[serde(default = "empty_encoding")]
    pub encoding: Encoding,
    /// Registered user name, or [`UNKNOWN_LABEL`].
    pub matched_name: String,
    /// `1 - distance` for a match, `0.0` for an unknown face.
    pub confidence: f32,
}

fn empty_encoding() -> Encoding {
    Encoding::new(Vec::new())
}

impl FaceDetection {
    pub fn is_known(&self) -> bool {
        self.matched_name != UNKNOWN_LABEL
    }
}

/// A license plate region and its recognized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateDetection {
    pub bbox: PixelBox,
    /// First recognized text span, or [`UNKNOWN_LABEL`].
    pub text: String,
    pub detection_confidence: f32,
}

/// One entry of the merged per-frame detection list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Detection {
    Face(FaceDetection),
    Plate(PlateDetection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Granted,
    Denied,
    Error,
}

/// Why an access request was denied.
#[derive(Debug, Clone, PartialEq)]
pub enum DenialReason {
    MissingDetection,
    UnknownFace { confidence: f32 },
    UnregisteredUser { face: String },
    PlateMismatch { detected: String, expected: String },
}

impl DenialReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::MissingDetection => "Could not detect both face and license plate",
            DenialReason::UnknownFace { .. } => "Face not recognized",
            DenialReason::UnregisteredUser { .. } => "Recognized user is no longer registered",
            DenialReason::PlateMismatch { .. } => "License plate does not match registered user",
        }
    }
}

/// Outcome of a single access request.
///
/// Serializes to a flat JSON object; only the fields relevant to `status`
/// are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub status: DecisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_plate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_plate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AccessDecision {
    fn empty(status: DecisionStatus) -> Self {
        Self {
            status,
            message: None,
            face: None,
            plate: None,
            confidence: None,
            detected_plate: None,
            expected_plate: None,
            timestamp: None,
        }
    }

    pub fn granted(face: String, plate: String, confidence: f32) -> Self {
        Self {
            face: Some(face),
            plate: Some(plate),
            confidence: Some(confidence),
            timestamp: Some(Utc::now()),
            ..Self::empty(DecisionStatus::Granted)
        }
    }

    pub fn denied(reason: DenialReason) -> Self {
        let mut decision = Self {
            message: Some(reason.message().to_string()),
            ..Self::empty(DecisionStatus::Denied)
        };
        match reason {
            DenialReason::MissingDetection => {}
            DenialReason::UnknownFace { confidence } => decision.confidence = Some(confidence),
            DenialReason::UnregisteredUser { face } => decision.face = Some(face),
            DenialReason::PlateMismatch { detected, expected } => {
                decision.detected_plate = Some(detected);
                decision.expected_plate = Some(expected);
            }
        }
        decision
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::empty(DecisionStatus::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        let a = Encoding::new(vec![0.3, 0.4, 0.5]);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_known_value() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = Encoding::new(vec![0.1, -0.7, 0.2]);
        let b = Encoding::new(vec![0.5, 0.3, -0.2]);
        assert!((a.distance(&b) - b.distance(&a)).abs() < 1e-6);
    }

    #[test]
    fn test_distance_mismatched_lengths_never_match() {
        let full = Encoding::new(vec![0.9, -0.3, 0.2]);
        assert_eq!(full.distance(&Encoding::new(vec![])), f32::INFINITY);
        assert_eq!(Encoding::new(vec![]).distance(&Encoding::new(vec![])), f32::INFINITY);

        let short = Encoding::new(vec![0.6, 0.8]);
        let long = Encoding::new(vec![0.6, 0.8, 5.0, 5.0]);
        assert_eq!(short.distance(&long), f32::INFINITY);
        assert_eq!(long.distance(&short), f32::INFINITY);
    }

    #[test]
    fn test_pixel_box_clamps_to_frame() {
        let b = PixelBox::from_edges(-10.4, 5.6, 700.0, 90.2, 640, 480);
        assert_eq!(b, PixelBox { left: 0, top: 6, right: 640, bottom: 90 });
        assert_eq!(b.width(), 640);
        assert_eq!(b.height(), 84);
    }

    #[test]
    fn test_pixel_box_swapped_edges() {
        let b = PixelBox::from_edges(50.0, 60.0, 10.0, 20.0, 100, 100);
        assert_eq!(b, PixelBox { left: 10, top: 20, right: 50, bottom: 60 });
        assert_eq!(b.area(), 1600);
    }

    #[test]
    fn test_denied_json_shape() {
        let d = AccessDecision::denied(DenialReason::MissingDetection);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "denied",
                "message": "Could not detect both face and license plate",
            })
        );
    }

    #[test]
    fn test_mismatch_json_shape() {
        let d = AccessDecision::denied(DenialReason::PlateMismatch {
            detected: "XYZ 999".into(),
            expected: "ABC123".into(),
        });
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["status"], "denied");
        assert_eq!(json["detected_plate"], "XYZ 999");
        assert_eq!(json["expected_plate"], "ABC123");
        assert!(json.get("face").is_none());
    }

    #[test]
    fn test_granted_has_timestamp() {
        let d = AccessDecision::granted("Alice".into(), "ABC 123".into(), 0.8);
        assert_eq!(d.status, DecisionStatus::Granted);
        assert!(d.timestamp.is_some());
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["status"], "granted");
        assert_eq!(json["face"], "Alice");
    }

    #[test]
    fn test_detection_tagged_by_type() {
        let d = Detection::Plate(PlateDetection {
            bbox: PixelBox { left: 1, top: 2, right: 3, bottom: 4 },
            text: "ABC123".into(),
            detection_confidence: 0.9,
        });
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["type"], "plate");
        assert_eq!(json["text"], "ABC123");
    }
}
