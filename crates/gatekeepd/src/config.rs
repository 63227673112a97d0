use gatekeep_core::face::{DEFAULT_MIN_FACE_SIZE, DEFAULT_SIMILARITY_THRESHOLD};
use gatekeep_core::ocr::DEFAULT_CHARSET;
use gatekeep_core::plate::DEFAULT_PLATE_CONFIDENCE;
use gatekeep_core::{DetectionMode, MatcherConfig, PlateConfig};
use std::path::{Path, PathBuf};

/// Which D-Bus bus the service is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the registry JSON file.
    pub registry_path: PathBuf,
    /// Maximum face distance for a positive match.
    pub similarity_threshold: f32,
    /// Faces smaller than this in either dimension are ignored.
    pub min_face_size: i32,
    /// Plate detections must score above this.
    pub plate_confidence: f32,
    /// Detector class index for plates.
    pub plate_class: usize,
    pub detection_mode: DetectionMode,
    /// Characters of the plate reader's output classes, after the CTC blank.
    pub ocr_charset: String,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `GATEKEEP_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("GATEKEEP_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models"));

        let registry_path = std::env::var("GATEKEEP_REGISTRY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_dir.join("known_faces").join("registry.json"));

        let detection_mode = std::env::var("GATEKEEP_DETECTION_MODE")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(mode) => Some(mode),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring GATEKEEP_DETECTION_MODE");
                    None
                }
            })
            .unwrap_or_default();

        let bus = match std::env::var("GATEKEEP_BUS").as_deref() {
            Ok("system") => BusKind::System,
            _ => BusKind::Session,
        };

        Self {
            model_dir,
            registry_path,
            similarity_threshold: env_parse("GATEKEEP_SIMILARITY_THRESHOLD", DEFAULT_SIMILARITY_THRESHOLD),
            min_face_size: env_parse("GATEKEEP_MIN_FACE_SIZE", DEFAULT_MIN_FACE_SIZE),
            plate_confidence: env_parse("GATEKEEP_PLATE_CONFIDENCE", DEFAULT_PLATE_CONFIDENCE),
            plate_class: env_parse("GATEKEEP_PLATE_CLASS", 0),
            detection_mode,
            ocr_charset: std::env::var("GATEKEEP_OCR_CHARSET")
                .unwrap_or_else(|_| DEFAULT_CHARSET.to_string()),
            bus,
        }
    }

    /// Path to the SCRFD face localization model.
    pub fn scrfd_model_path(&self) -> String {
        model_path(&self.model_dir, "det_10g.onnx")
    }

    /// Path to the ArcFace encoding model.
    pub fn arcface_model_path(&self) -> String {
        model_path(&self.model_dir, "w600k_r50.onnx")
    }

    /// Path to the YOLO plate detection model.
    pub fn plate_model_path(&self) -> String {
        model_path(&self.model_dir, "plate_yolo.onnx")
    }

    /// Path to the CRNN plate reader model.
    pub fn ocr_model_path(&self) -> String {
        model_path(&self.model_dir, "plate_rec.onnx")
    }

    /// What the engine was started with, for the Status method.
    pub fn status_info(&self) -> serde_json::Value {
        serde_json::json!({
            "detection_mode": self.detection_mode.as_str(),
            "similarity_threshold": self.similarity_threshold,
            "model_dir": self.model_dir.display().to_string(),
            "models": {
                "face_locator": self.scrfd_model_path(),
                "face_encoder": self.arcface_model_path(),
                "plate_detector": self.plate_model_path(),
                "plate_reader": self.ocr_model_path(),
            },
        })
    }

    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            similarity_threshold: self.similarity_threshold,
            min_face_size: self.min_face_size,
            mode: self.detection_mode,
            ..MatcherConfig::default()
        }
    }

    pub fn plate_config(&self) -> PlateConfig {
        PlateConfig {
            min_confidence: self.plate_confidence,
            plate_class: self.plate_class,
        }
    }
}

fn model_path(dir: &Path, file: &str) -> String {
    dir.join(file).to_string_lossy().into_owned()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl Config {
    pub(crate) fn with_model_dir(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            registry_path: PathBuf::from("/var/lib/gatekeep/registry.json"),
            similarity_threshold: 0.5,
            min_face_size: 20,
            plate_confidence: 0.5,
            plate_class: 0,
            detection_mode: DetectionMode::Fast,
            ocr_charset: DEFAULT_CHARSET.to_string(),
            bus: BusKind::Session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_under_model_dir() {
        let config = Config::with_model_dir("/opt/gatekeep/models");
        assert_eq!(config.scrfd_model_path(), "/opt/gatekeep/models/det_10g.onnx");
        assert_eq!(config.plate_model_path(), "/opt/gatekeep/models/plate_yolo.onnx");

        let matcher = config.matcher_config();
        assert_eq!(matcher.register_upsample, 2);
        assert_eq!(matcher.detect_upsample, 1);
    }

    #[test]
    fn test_status_info_reports_mode_and_models() {
        let mut config = Config::with_model_dir("/opt/gatekeep/models");
        config.detection_mode = DetectionMode::Accurate;
        let info = config.status_info();
        assert_eq!(info["detection_mode"], "accurate");
        assert_eq!(info["model_dir"], "/opt/gatekeep/models");
        assert_eq!(info["models"]["face_encoder"], "/opt/gatekeep/models/w600k_r50.onnx");
        assert_eq!(info["models"]["plate_reader"], "/opt/gatekeep/models/plate_rec.onnx");
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("GATEKEEP_TEST_PARSE_GARBAGE", "not-a-number");
        assert_eq!(env_parse("GATEKEEP_TEST_PARSE_GARBAGE", 0.5f32), 0.5);
        std::env::set_var("GATEKEEP_TEST_PARSE_OK", "0.42");
        assert_eq!(env_parse("GATEKEEP_TEST_PARSE_OK", 0.5f32), 0.42);
    }
}
