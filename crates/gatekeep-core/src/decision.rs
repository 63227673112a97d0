//! Access decisions: combine the best face and the first plate of a frame
//! into a grant or a denial.

use crate::face::FaceIdentityMatcher;
use crate::frame::Frame;
use crate::models::ModelError;
use crate::plate::PlateExtractor;
use crate::registry::{RegistryError, RegistrySnapshot, UserRegistry};
use crate::types::{
    AccessDecision, DenialReason, Detection, FaceDetection, PlateDetection, UserRecord,
};
use std::sync::Arc;

/// The per-request detection service: both pipelines plus the registry they read.
pub struct AccessDecisionEngine {
    faces: FaceIdentityMatcher,
    plates: PlateExtractor,
    registry: Arc<UserRegistry>,
}

impl AccessDecisionEngine {
    pub fn new(faces: FaceIdentityMatcher, plates: PlateExtractor, registry: Arc<UserRegistry>) -> Self {
        Self {
            faces,
            plates,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<UserRegistry> {
        &self.registry
    }

    /// Faces (identified) followed by plates (read), for one frame.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, ModelError> {
        let snapshot = self.registry.snapshot();
        let (faces, plates) = self.run_pipelines(frame, &snapshot)?;
        Ok(faces
            .into_iter()
            .map(Detection::Face)
            .chain(plates.into_iter().map(Detection::Plate))
            .collect())
    }

    /// Decide whether the person and vehicle in `frame` may pass.
    ///
    /// Never fails: pipeline errors become an `error` decision.
    pub fn decide(&mut self, frame: &Frame) -> AccessDecision {
        let snapshot = self.registry.snapshot();
        let decision = match self.run_pipelines(frame, &snapshot) {
            Ok((faces, plates)) => evaluate(&faces, &plates, &snapshot),
            Err(e) => {
                tracing::error!(error = %e, "detection failed during access check");
                AccessDecision::error(e.to_string())
            }
        };

        tracing::info!(
            status = ?decision.status,
            face = decision.face.as_deref(),
            message = decision.message.as_deref(),
            "access decision"
        );
        decision
    }

    /// Register a new user from a face image.
    pub fn register(
        &mut self,
        name: &str,
        plate_number: &str,
        face_image: &Frame,
    ) -> Result<UserRecord, RegistryError> {
        self.registry
            .register(&mut self.faces, name, plate_number, face_image)
    }

    fn run_pipelines(
        &mut self,
        frame: &Frame,
        snapshot: &RegistrySnapshot,
    ) -> Result<(Vec<FaceDetection>, Vec<PlateDetection>), ModelError> {
        let faces = self.faces.detect_and_identify(frame, snapshot)?;
        let plates = self.plates.detect_plates(frame)?;
        Ok((faces, plates))
    }
}

/// The decision rule over one frame's detections.
pub fn evaluate(
    faces: &[FaceDetection],
    plates: &[PlateDetection],
    registry: &RegistrySnapshot,
) -> AccessDecision {
    let face = faces.iter().fold(None::<&FaceDetection>, |best, f| match best {
        Some(b) if b.confidence >= f.confidence => Some(b),
        _ => Some(f),
    });

    let (Some(face), Some(plate)) = (face, plates.first()) else {
        return AccessDecision::denied(DenialReason::MissingDetection);
    };

    if !face.is_known() {
        return AccessDecision::denied(DenialReason::UnknownFace {
            confidence: face.confidence,
        });
    }

    let Some(user) = registry.get(&face.matched_name) else {
        return AccessDecision::denied(DenialReason::UnregisteredUser {
            face: face.matched_name.clone(),
        });
    };

    if plates_match(&plate.text, &user.plate_number) {
        AccessDecision::granted(face.matched_name.clone(), plate.text.clone(), face.confidence)
    } else {
        AccessDecision::denied(DenialReason::PlateMismatch {
            detected: plate.text.clone(),
            expected: user.plate_number.clone(),
        })
    }
}

/// Uppercase and drop all whitespace.
pub fn normalize_plate(plate: &str) -> String {
    plate
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Case- and whitespace-insensitive plate equality.
pub fn plates_match(detected: &str, registered: &str) -> bool {
    normalize_plate(detected) == normalize_plate(registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::MatcherConfig;
    use crate::models::ObjectDetection;
    use crate::plate::PlateConfig;
    use crate::testing::{
        face_box, frame, pixel_box, record, snapshot, FakeDetector, FakeEncoder, FakeLocator,
        FakeRecognizer,
    };
    use crate::types::{DecisionStatus, Encoding, UNKNOWN_LABEL};

    fn face(name: &str, confidence: f32) -> FaceDetection {
        FaceDetection {
            bbox: pixel_box(0, 0, 50, 50),
            encoding: Encoding::new(vec![]),
            matched_name: name.to_string(),
            confidence,
        }
    }

    fn plate(text: &str) -> PlateDetection {
        PlateDetection {
            bbox: pixel_box(0, 100, 80, 130),
            text: text.to_string(),
            detection_confidence: 0.9,
        }
    }

    fn alice_registry() -> RegistrySnapshot {
        snapshot(vec![record("Alice", vec![1.0, 0.0], "ABC 123")])
    }

    #[test]
    fn test_plate_comparison() {
        assert!(plates_match("ABC 123", "abc123"));
        assert!(!plates_match("ABC 123", "ABD123"));
        assert!(plates_match(" a b\tc\n1 2 3 ", "ABC123"));
        assert_eq!(normalize_plate("ab c 12"), "ABC12");
    }

    #[test]
    fn test_nothing_detected() {
        let d = evaluate(&[], &[], &alice_registry());
        assert_eq!(d.status, DecisionStatus::Denied);
        assert_eq!(d.message.as_deref(), Some("Could not detect both face and license plate"));
    }

    #[test]
    fn test_face_without_plate() {
        let d = evaluate(&[face("Alice", 0.9)], &[], &alice_registry());
        assert_eq!(d.message.as_deref(), Some("Could not detect both face and license plate"));
    }

    #[test]
    fn test_unknown_face() {
        let d = evaluate(&[face(UNKNOWN_LABEL, 0.0)], &[plate("ABC123")], &alice_registry());
        assert_eq!(d.status, DecisionStatus::Denied);
        assert_eq!(d.message.as_deref(), Some("Face not recognized"));
        assert_eq!(d.confidence, Some(0.0));
    }

    #[test]
    fn test_granted() {
        let d = evaluate(&[face("Alice", 0.8)], &[plate("abc123")], &alice_registry());
        assert_eq!(d.status, DecisionStatus::Granted);
        assert_eq!(d.face.as_deref(), Some("Alice"));
        assert_eq!(d.plate.as_deref(), Some("abc123"));
        assert_eq!(d.confidence, Some(0.8));
        assert!(d.timestamp.is_some());
    }

    #[test]
    fn test_plate_mismatch() {
        let d = evaluate(&[face("Alice", 0.8)], &[plate("XYZ 999")], &alice_registry());
        assert_eq!(d.status, DecisionStatus::Denied);
        assert_eq!(d.message.as_deref(), Some("License plate does not match registered user"));
        assert_eq!(d.detected_plate.as_deref(), Some("XYZ 999"));
        assert_eq!(d.expected_plate.as_deref(), Some("ABC 123"));
    }

    #[test]
    fn test_face_no_longer_registered() {
        let d = evaluate(&[face("Carol", 0.8)], &[plate("ABC123")], &alice_registry());
        assert_eq!(d.status, DecisionStatus::Denied);
        assert_eq!(d.message.as_deref(), Some("Recognized user is no longer registered"));
        assert_eq!(d.face.as_deref(), Some("Carol"));
        assert!(d.expected_plate.is_none());
    }

    #[test]
    fn test_best_face_wins_first_plate_used() {
        let faces = [face(UNKNOWN_LABEL, 0.0), face("Alice", 0.7), face("Alice", 0.6)];
        let plates = [plate("ABC123"), plate("XYZ999")];
        let d = evaluate(&faces, &plates, &alice_registry());
        assert_eq!(d.status, DecisionStatus::Granted);
        assert_eq!(d.confidence, Some(0.7));
        assert_eq!(d.plate.as_deref(), Some("ABC123"));
    }

    fn engine_with(
        dir: &tempfile::TempDir,
        locator: FakeLocator,
        encoder: FakeEncoder,
        detector: FakeDetector,
        recognizer: FakeRecognizer,
    ) -> AccessDecisionEngine {
        let registry = Arc::new(UserRegistry::load(dir.path().join("registry.json")));
        AccessDecisionEngine::new(
            FaceIdentityMatcher::new(Box::new(locator), Box::new(encoder), MatcherConfig::default()),
            PlateExtractor::new(Box::new(detector), Box::new(recognizer), PlateConfig::default()),
            registry,
        )
    }

    fn plate_hit(left: i32) -> ObjectDetection {
        ObjectDetection {
            bbox: pixel_box(left, 200, left + 80, 230),
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn test_register_then_grant_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(
            &dir,
            FakeLocator::new(vec![face_box(10.0, 10.0, 60.0, 0.99)]),
            FakeEncoder::new().with(10, vec![0.6, 0.8]),
            FakeDetector::new(vec![plate_hit(100)]),
            FakeRecognizer::new().with(100, &["abc 123"]),
        );

        engine.register("Alice", "ABC123", &frame(400, 300)).unwrap();
        let d = engine.decide(&frame(400, 300));
        assert_eq!(d.status, DecisionStatus::Granted);
        assert_eq!(d.face.as_deref(), Some("Alice"));
        assert_eq!(d.plate.as_deref(), Some("abc 123"));
        assert!((d.confidence.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_detect_merges_faces_then_plates() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(
            &dir,
            FakeLocator::new(vec![face_box(10.0, 10.0, 60.0, 0.99)]),
            FakeEncoder::new().with(10, vec![0.6, 0.8]),
            FakeDetector::new(vec![plate_hit(100), plate_hit(300)]),
            FakeRecognizer::new().failing_at(100).with(300, &["XYZ 999"]),
        );

        let detections = engine.detect(&frame(400, 300)).unwrap();
        assert_eq!(detections.len(), 3);
        assert!(matches!(&detections[0], Detection::Face(f) if f.matched_name == UNKNOWN_LABEL));
        assert!(matches!(&detections[1], Detection::Plate(p) if p.text == UNKNOWN_LABEL));
        assert!(matches!(&detections[2], Detection::Plate(p) if p.text == "XYZ 999"));
    }

    #[test]
    fn test_pipeline_failure_becomes_error_decision() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(
            &dir,
            FakeLocator::new(vec![]),
            FakeEncoder::new(),
            FakeDetector::failing(),
            FakeRecognizer::new(),
        );

        let d = engine.decide(&frame(100, 100));
        assert_eq!(d.status, DecisionStatus::Error);
        assert!(d.message.unwrap().contains("fake detector failure"));
    }
}
