//! Face identity matching: locate, encode, and look up faces against a registry snapshot.

use crate::frame::Frame;
use crate::models::{DetectionMode, FaceEncoder, FaceLocator, LocateOptions, ModelError};
use crate::registry::RegistrySnapshot;
use crate::types::{BoundingBox, Encoding, FaceDetection, UNKNOWN_LABEL};

/// Maximum face distance still considered the same person.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;
/// Faces smaller than this (either side, pixels) are treated as noise.
pub const DEFAULT_MIN_FACE_SIZE: i32 = 20;

/// Tuning for [`FaceIdentityMatcher`].
#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    pub similarity_threshold: f32,
    pub min_face_size: i32,
    pub mode: DetectionMode,
    /// Upsample factor for per-request detection.
    pub detect_upsample: u32,
    /// Upsample factor for registration images, where recall matters more than latency.
    pub register_upsample: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            mode: DetectionMode::Fast,
            detect_upsample: 1,
            register_upsample: 2,
        }
    }
}

/// Face localization + encoding + nearest-neighbor lookup.
pub struct FaceIdentityMatcher {
    locator: Box<dyn FaceLocator>,
    encoder: Box<dyn FaceEncoder>,
    config: MatcherConfig,
}

impl FaceIdentityMatcher {
    pub fn new(
        locator: Box<dyn FaceLocator>,
        encoder: Box<dyn FaceEncoder>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            locator,
            encoder,
            config,
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Locate every face in `frame`, drop undersized ones, and label each
    /// with its closest registered user (or [`UNKNOWN_LABEL`]).
    ///
    /// Reads `registry` only. When two users tie on distance, map iteration
    /// order decides.
    pub fn detect_and_identify(
        &mut self,
        frame: &Frame,
        registry: &RegistrySnapshot,
    ) -> Result<Vec<FaceDetection>, ModelError> {
        let options = LocateOptions {
            mode: self.config.mode,
            upsample: self.config.detect_upsample,
        };
        let located = self.locator.locate(frame, options)?;
        let total = located.len();

        let faces: Vec<BoundingBox> = located
            .into_iter()
            .filter(|b| {
                let px = b.to_pixel_box(frame.width(), frame.height());
                px.width() >= self.config.min_face_size && px.height() >= self.config.min_face_size
            })
            .collect();

        if faces.len() < total {
            tracing::debug!(dropped = total - faces.len(), "discarded undersized faces");
        }
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self.encoder.encode(frame, &faces)?;
        if encodings.len() != faces.len() {
            return Err(ModelError::InferenceFailed(format!(
                "encoder returned {} encodings for {} faces",
                encodings.len(),
                faces.len()
            )));
        }

        let detections = faces
            .iter()
            .zip(encodings)
            .map(|(face, encoding)| {
                let (matched_name, confidence) =
                    match best_match(&encoding, registry, self.config.similarity_threshold) {
                        Some((name, distance)) => (name.to_string(), 1.0 - distance),
                        None => (UNKNOWN_LABEL.to_string(), 0.0),
                    };
                FaceDetection {
                    bbox: face.to_pixel_box(frame.width(), frame.height()),
                    encoding,
                    matched_name,
                    confidence,
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            faces = detections.len(),
            known = detections.iter().filter(|d| d.is_known()).count(),
            "faces identified"
        );

        Ok(detections)
    }

    /// Encode the largest face in a registration image, or `None` if no face is found.
    pub fn encode_largest(&mut self, frame: &Frame) -> Result<Option<Encoding>, ModelError> {
        let options = LocateOptions {
            mode: self.config.mode,
            upsample: self.config.register_upsample,
        };
        let located = self.locator.locate(frame, options)?;
        if located.len() > 1 {
            tracing::info!(faces = located.len(), "multiple faces in registration image, using the largest");
        }

        let Some(largest) = located.into_iter().max_by(|a, b| {
            (a.width * a.height)
                .partial_cmp(&(b.width * b.height))
                .unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            return Ok(None);
        };

        let mut encodings = self.encoder.encode(frame, std::slice::from_ref(&largest))?;
        if encodings.is_empty() {
            return Err(ModelError::InferenceFailed("encoder returned no encoding".into()));
        }
        Ok(Some(encodings.swap_remove(0)))
    }
}

/// Closest registered user strictly under `threshold`, with its distance.
///
/// Scans every record.
pub fn best_match<'a>(
    encoding: &Encoding,
    registry: &'a RegistrySnapshot,
    threshold: f32,
) -> Option<(&'a str, f32)> {
    let mut best: Option<(&'a str, f32)> = None;
    for record in registry.values() {
        let distance = encoding.distance(&record.face_encoding);
        if distance < threshold && best.map_or(true, |(_, d)| distance < d) {
            best = Some((record.name.as_str(), distance));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_box, frame, record, snapshot, FakeEncoder, FakeLocator};

    fn matcher(boxes: Vec<BoundingBox>, encoder: FakeEncoder) -> FaceIdentityMatcher {
        FaceIdentityMatcher::new(
            Box::new(FakeLocator::new(boxes)),
            Box::new(encoder),
            MatcherConfig::default(),
        )
    }

    #[test]
    fn test_best_match_picks_minimum_under_threshold() {
        let registry = snapshot(vec![
            record("Alice", vec![1.0, 0.0], "ABC123"),
            record("Bob", vec![0.0, 1.0], "XYZ999"),
        ]);
        let query = Encoding::new(vec![0.9, 0.1]);
        let (name, distance) = best_match(&query, &registry, 0.5).unwrap();
        assert_eq!(name, "Alice");
        assert!((distance - 0.02f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_threshold_is_strict() {
        let registry = snapshot(vec![record("Alice", vec![0.0, 0.0], "ABC123")]);
        assert!(best_match(&Encoding::new(vec![0.5, 0.0]), &registry, 0.5).is_none());
        assert!(best_match(&Encoding::new(vec![0.49, 0.0]), &registry, 0.5).is_some());
    }

    #[test]
    fn test_best_match_empty_registry() {
        let registry = snapshot(vec![]);
        assert!(best_match(&Encoding::new(vec![1.0]), &registry, 0.5).is_none());
    }

    #[test]
    fn test_identify_known_and_unknown() {
        let registry = snapshot(vec![record("Alice", vec![1.0, 0.0], "ABC123")]);
        let encoder = FakeEncoder::new()
            .with(10, vec![1.0, 0.1])
            .with(200, vec![-1.0, 0.0]);
        let mut m = matcher(vec![face_box(10.0, 10.0, 60.0, 0.99), face_box(200.0, 10.0, 60.0, 0.9)], encoder);

        let faces = m.detect_and_identify(&frame(400, 300), &registry).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].matched_name, "Alice");
        assert!((faces[0].confidence - 0.9).abs() < 1e-5);
        assert_eq!(faces[1].matched_name, UNKNOWN_LABEL);
        assert_eq!(faces[1].confidence, 0.0);
    }

    #[test]
    fn test_identify_drops_small_faces() {
        let registry = snapshot(vec![record("Alice", vec![1.0, 0.0], "ABC123")]);
        let encoder = FakeEncoder::new().with(10, vec![1.0, 0.0]).with(100, vec![1.0, 0.0]);
        let mut m = matcher(
            vec![
                face_box(10.0, 10.0, 19.0, 0.99),
                BoundingBox { width: 40.0, height: 12.0, ..face_box(100.0, 10.0, 40.0, 0.95) },
            ],
            encoder,
        );

        let faces = m.detect_and_identify(&frame(400, 300), &registry).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_identify_propagates_locator_failure() {
        let registry = snapshot(vec![]);
        let mut m = FaceIdentityMatcher::new(
            Box::new(FakeLocator::failing()),
            Box::new(FakeEncoder::new()),
            MatcherConfig::default(),
        );
        assert!(m.detect_and_identify(&frame(100, 100), &registry).is_err());
    }

    #[test]
    fn test_wrong_length_record_never_matches() {
        let registry = snapshot(vec![
            record("Empty", vec![], "AAA111"),
            record("Short", vec![1.0], "BBB222"),
        ]);
        let query = Encoding::new(vec![1.0, 0.0]);
        assert!(best_match(&query, &registry, DEFAULT_SIMILARITY_THRESHOLD).is_none());
    }

    #[test]
    fn test_encode_largest_picks_biggest_box() {
        let encoder = FakeEncoder::new().with(10, vec![0.1]).with(100, vec![0.7]);
        let mut m = matcher(vec![face_box(10.0, 10.0, 30.0, 0.99), face_box(100.0, 10.0, 80.0, 0.8)], encoder);

        let encoding = m.encode_largest(&frame(400, 300)).unwrap().unwrap();
        assert_eq!(encoding.values, vec![0.7]);
    }

    #[test]
    fn test_encode_largest_no_face() {
        let mut m = matcher(vec![], FakeEncoder::new());
        assert!(m.encode_largest(&frame(100, 100)).unwrap().is_none());
    }

    #[test]
    fn test_registration_uses_higher_upsample() {
        let locator = FakeLocator::new(vec![face_box(10.0, 10.0, 30.0, 0.9)]);
        let seen = locator.seen_options();
        let mut m = FaceIdentityMatcher::new(
            Box::new(locator),
            Box::new(FakeEncoder::new().with(10, vec![0.0])),
            MatcherConfig::default(),
        );
        m.encode_largest(&frame(100, 100)).unwrap();
        m.detect_and_identify(&frame(100, 100), &snapshot(vec![])).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].upsample, 2);
        assert_eq!(seen[1].upsample, 1);
    }
}
