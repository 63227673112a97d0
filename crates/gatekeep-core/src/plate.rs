//! License plate extraction: detect plate regions, then read their text.

use crate::frame::Frame;
use crate::models::{ModelError, ObjectDetector, TextRecognizer};
use crate::types::{PlateDetection, UNKNOWN_LABEL};

pub const DEFAULT_PLATE_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct PlateConfig {
    /// Detections must score strictly above this.
    pub min_confidence: f32,
    /// Detector class index of "plate".
    pub plate_class: usize,
}

impl Default for PlateConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_PLATE_CONFIDENCE,
            plate_class: 0,
        }
    }
}

pub struct PlateExtractor {
    detector: Box<dyn ObjectDetector>,
    recognizer: Box<dyn TextRecognizer>,
    config: PlateConfig,
}

impl PlateExtractor {
    pub fn new(
        detector: Box<dyn ObjectDetector>,
        recognizer: Box<dyn TextRecognizer>,
        config: PlateConfig,
    ) -> Self {
        Self {
            detector,
            recognizer,
            config,
        }
    }

    /// Find plates in an RGB frame and read each one.
    ///
    /// One result per confident plate box, in detector order. A recognition
    /// failure on one region yields [`UNKNOWN_LABEL`] for that region only.
    pub fn detect_plates(&mut self, frame: &Frame) -> Result<Vec<PlateDetection>, ModelError> {
        let bgr = frame.to_bgr();
        let detections = self.detector.detect(&bgr)?;

        let mut plates = Vec::new();
        for det in detections {
            if det.class_id != self.config.plate_class || det.confidence <= self.config.min_confidence {
                continue;
            }

            let text = match frame.crop(&det.bbox) {
                Some(crop) => self.read_text(&crop),
                None => {
                    tracing::debug!(bbox = ?det.bbox, "plate box outside frame");
                    UNKNOWN_LABEL.to_string()
                }
            };

            plates.push(PlateDetection {
                bbox: det.bbox,
                text,
                detection_confidence: det.confidence,
            });
        }

        tracing::debug!(plates = plates.len(), "plates extracted");
        Ok(plates)
    }

    fn read_text(&mut self, crop: &Frame) -> String {
        match self.recognizer.recognize(crop) {
            Ok(spans) => spans
                .into_iter()
                .next()
                .map(|span| span.text)
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "OCR failed on plate region");
                UNKNOWN_LABEL.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectDetection;
    use crate::testing::{frame, pixel_box, FakeDetector, FakeRecognizer};

    fn plate(left: i32, confidence: f32, class_id: usize) -> ObjectDetection {
        ObjectDetection {
            bbox: pixel_box(left, 100, left + 80, 130),
            confidence,
            class_id,
        }
    }

    fn extractor(dets: Vec<ObjectDetection>, recognizer: FakeRecognizer) -> PlateExtractor {
        PlateExtractor::new(
            Box::new(FakeDetector::new(dets)),
            Box::new(recognizer),
            PlateConfig::default(),
        )
    }

    #[test]
    fn test_reads_first_span() {
        let recognizer = FakeRecognizer::new().with(10, &["ABC 123", "noise"]);
        let mut ex = extractor(vec![plate(10, 0.9, 0)], recognizer);
        let plates = ex.detect_plates(&frame(400, 300)).unwrap();
        assert_eq!(plates.len(), 1);
        assert_eq!(plates[0].text, "ABC 123");
        assert!((plates[0].detection_confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_filters_confidence_and_class() {
        let recognizer = FakeRecognizer::new()
            .with(10, &["AAA"])
            .with(110, &["BBB"])
            .with(210, &["CCC"]);
        let mut ex = extractor(
            vec![plate(10, 0.5, 0), plate(110, 0.95, 1), plate(210, 0.51, 0)],
            recognizer,
        );
        let plates = ex.detect_plates(&frame(400, 300)).unwrap();
        assert_eq!(plates.len(), 1);
        assert_eq!(plates[0].text, "CCC");
    }

    #[test]
    fn test_empty_ocr_is_unknown() {
        let mut ex = extractor(vec![plate(10, 0.9, 0)], FakeRecognizer::new());
        let plates = ex.detect_plates(&frame(400, 300)).unwrap();
        assert_eq!(plates[0].text, UNKNOWN_LABEL);
    }

    #[test]
    fn test_ocr_failure_does_not_abort_other_regions() {
        let recognizer = FakeRecognizer::new().failing_at(10).with(200, &["XYZ 999"]);
        let mut ex = extractor(vec![plate(10, 0.9, 0), plate(200, 0.8, 0)], recognizer);
        let plates = ex.detect_plates(&frame(400, 300)).unwrap();
        assert_eq!(plates.len(), 2);
        assert_eq!(plates[0].text, UNKNOWN_LABEL);
        assert_eq!(plates[1].text, "XYZ 999");
    }

    #[test]
    fn test_box_outside_frame_is_unknown() {
        let mut ex = extractor(vec![plate(500, 0.9, 0)], FakeRecognizer::new().with(500, &["ZZZ"]));
        let plates = ex.detect_plates(&frame(400, 300)).unwrap();
        assert_eq!(plates.len(), 1);
        assert_eq!(plates[0].text, UNKNOWN_LABEL);
    }

    #[test]
    fn test_detector_failure_propagates() {
        let mut ex = PlateExtractor::new(
            Box::new(FakeDetector::failing()),
            Box::new(FakeRecognizer::new()),
            PlateConfig::default(),
        );
        assert!(ex.detect_plates(&frame(100, 100)).is_err());
    }
}
