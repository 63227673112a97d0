//! CRNN text recognizer via ONNX Runtime.
//!
//! Reads a single text line from a plate crop: height-normalized resize,
//! one inference, then greedy CTC decoding against a fixed character set.

use crate::frame::Frame;
use crate::models::{ModelError, TextRecognizer, TextSpan};
use crate::types::PixelBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const REC_INPUT_HEIGHT: usize = 48;
const REC_MAX_WIDTH: usize = 320;
const REC_MIN_WIDTH: usize = 16;

/// Default plate alphabet. Index 0 of the model output is the CTC blank.
pub const DEFAULT_CHARSET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub struct CrnnRecognizer {
    session: Session,
    charset: Vec<char>,
}

impl CrnnRecognizer {
    pub fn load(model_path: &str, charset: &str) -> Result<Self, ModelError> {
        if !Path::new(model_path).exists() {
            return Err(ModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, charset_len = charset.chars().count(), "loaded CRNN model");

        Ok(Self {
            session,
            charset: charset.chars().collect(),
        })
    }
}

impl TextRecognizer for CrnnRecognizer {
    fn recognize(&mut self, crop: &Frame) -> Result<Vec<TextSpan>, ModelError> {
        let input = preprocess(crop);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, probs) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("CTC output: {e}")))?;

        // [1, timesteps, classes]
        if shape.len() != 3 {
            return Err(ModelError::InferenceFailed(format!(
                "expected 3-d CTC output, got {:?}",
                &shape[..]
            )));
        }
        let steps = shape[1] as usize;
        let classes = shape[2] as usize;

        let Some((text, confidence)) = ctc_greedy_decode(probs, steps, classes, &self.charset) else {
            return Ok(Vec::new());
        };

        Ok(vec![TextSpan {
            bbox: PixelBox {
                left: 0,
                top: 0,
                right: crop.width() as i32,
                bottom: crop.height() as i32,
            },
            text,
            confidence,
        }])
    }
}

/// Resize to the recognizer height keeping aspect ratio, right-pad to the
/// max width, and normalize to [-1, 1].
fn preprocess(crop: &Frame) -> Array4<f32> {
    let src_w = crop.width() as usize;
    let src_h = crop.height() as usize;
    let ratio = src_w as f32 / src_h as f32;
    let new_w = ((REC_INPUT_HEIGHT as f32 * ratio).ceil() as usize).clamp(REC_MIN_WIDTH, REC_MAX_WIDTH);

    let mut tensor = Array4::<f32>::zeros((1, 3, REC_INPUT_HEIGHT, REC_MAX_WIDTH));
    for y in 0..REC_INPUT_HEIGHT {
        let src_y = (y * src_h / REC_INPUT_HEIGHT).min(src_h - 1);
        for x in 0..new_w {
            let src_x = (x * src_w / new_w).min(src_w - 1);
            let px = crop.pixel(src_x, src_y);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (px[c] as f32 / 255.0 - 0.5) / 0.5;
            }
        }
    }
    tensor
}

/// Greedy CTC decode: argmax per step, collapse repeats, drop blanks (class 0).
///
/// Returns the text and the mean probability of the emitted characters, or
/// `None` if nothing was emitted.
fn ctc_greedy_decode(
    probs: &[f32],
    steps: usize,
    classes: usize,
    charset: &[char],
) -> Option<(String, f32)> {
    let mut text = String::new();
    let mut score_sum = 0.0f32;
    let mut emitted = 0usize;
    let mut prev = 0usize;

    for t in 0..steps {
        let row = probs.get(t * classes..(t + 1) * classes)?;
        let (best, p) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc });

        if best != 0 && best != prev {
            if let Some(&ch) = charset.get(best - 1) {
                text.push(ch);
                score_sum += p;
                emitted += 1;
            }
        }
        prev = best;
    }

    if emitted == 0 {
        None
    } else {
        Some((text, score_sum / emitted as f32))
    }
}
