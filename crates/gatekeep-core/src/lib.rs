//! gatekeep-core — Face + license plate access decisions.
//!
//! Uses SCRFD for face localization, ArcFace for face encoding, a YOLO
//! plate detector and a CRNN plate reader, all via ONNX Runtime. The
//! decision pipeline itself only sees the traits in [`models`].

pub mod alignment;
pub mod decision;
pub mod detector;
pub mod face;
pub mod frame;
pub mod models;
pub mod ocr;
pub mod plate;
pub mod plate_detector;
pub mod recognizer;
pub mod registry;
pub mod types;

#[cfg(test)]
mod testing;

pub use decision::{plates_match, AccessDecisionEngine};
pub use detector::ScrfdLocator;
pub use face::{FaceIdentityMatcher, MatcherConfig};
pub use frame::{Frame, FrameError};
pub use models::{DetectionMode, ModelError};
pub use ocr::CrnnRecognizer;
pub use plate::{PlateConfig, PlateExtractor};
pub use plate_detector::YoloPlateDetector;
pub use recognizer::ArcFaceEncoder;
pub use registry::{RegistryError, UserRegistry};
pub use types::{AccessDecision, DecisionStatus, Detection, Encoding, UserRecord};
