use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::extractor::{ExtractorFactory, PoseExtractor};
use super::landmark::{Landmark, LandmarkFrame, LandmarkIndex};

/// BlazePose landmark model input size
pub const INPUT_SIZE: u32 = 256;

/// Values per landmark in the model output: x, y, z, visibility, presence
const LANDMARK_STRIDE: usize = 5;

/// BlazePose landmark model run through ONNX Runtime
pub struct OnnxPoseExtractor {
    session: Session,
    presence_threshold: f32,
}

impl OnnxPoseExtractor {
    pub fn new<P: AsRef<Path>>(model_path: P, presence_threshold: f32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load pose model from {}", model_path.display()))?;

        Ok(Self {
            session,
            presence_threshold,
        })
    }
}

impl PoseExtractor for OnnxPoseExtractor {
    /// Output 0: [1, 195] landmarks (39 x 5, the first 33 are the body),
    /// output 1: [1, 1] pose presence.
    fn detect(&mut self, image: &RgbImage) -> Result<Option<LandmarkFrame>> {
        let input = Tensor::from_array(preprocess(image))?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("pose inference failed")?;

        if outputs.len() < 2 {
            bail!("pose model returned {} outputs, expected 2", outputs.len());
        }

        let presence = outputs[1]
            .try_extract_array::<f32>()?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0);
        if presence < self.presence_threshold {
            return Ok(None);
        }

        let raw: Vec<f32> = outputs[0].try_extract_array::<f32>()?.iter().copied().collect();
        decode_landmarks(&raw).map(Some)
    }
}

/// Resizes to the model input and scales to [0, 1], NHWC.
fn preprocess(image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Converts raw model output (pixels in input space, visibility logits) into
/// normalized landmarks.
fn decode_landmarks(raw: &[f32]) -> Result<LandmarkFrame> {
    let needed = LandmarkIndex::COUNT * LANDMARK_STRIDE;
    if raw.len() < needed {
        bail!("landmark output has {} values, expected at least {}", raw.len(), needed);
    }

    let scale = INPUT_SIZE as f32;
    let mut landmarks = [Landmark::default(); LandmarkIndex::COUNT];
    for (i, chunk) in raw.chunks_exact(LANDMARK_STRIDE).take(LandmarkIndex::COUNT).enumerate() {
        landmarks[i] = Landmark::new(
            chunk[0] / scale,
            chunk[1] / scale,
            chunk[2] / scale,
            sigmoid(chunk[3]),
        );
    }
    Ok(LandmarkFrame::new(landmarks))
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Loads a fresh model session for every posture session.
#[derive(Debug, Clone)]
pub struct OnnxExtractorFactory {
    model_path: PathBuf,
    presence_threshold: f32,
}

impl OnnxExtractorFactory {
    pub fn new(model_path: impl Into<PathBuf>, presence_threshold: f32) -> Self {
        Self {
            model_path: model_path.into(),
            presence_threshold,
        }
    }
}

impl ExtractorFactory for OnnxExtractorFactory {
    fn create(&self) -> Result<Box<dyn PoseExtractor>> {
        let extractor = OnnxPoseExtractor::new(&self.model_path, self.presence_threshold)?;
        Ok(Box::new(extractor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_landmarks_normalizes() {
        let mut raw = vec![0.0f32; 39 * LANDMARK_STRIDE];
        // left ear at pixel (64, 128), visibility logit 0
        let base = LandmarkIndex::LeftEar as usize * LANDMARK_STRIDE;
        raw[base] = 64.0;
        raw[base + 1] = 128.0;
        raw[base + 3] = 0.0;

        let frame = decode_landmarks(&raw).unwrap();
        let ear = frame.get(LandmarkIndex::LeftEar);
        assert!((ear.x - 0.25).abs() < 1e-6);
        assert!((ear.y - 0.5).abs() < 1e-6);
        assert!((ear.visibility - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_landmarks_short_output() {
        assert!(decode_landmarks(&[0.0; 10]).is_err());
    }

    #[test]
    fn test_preprocess_shape() {
        let image = RgbImage::from_pixel(32, 16, image::Rgb([255, 0, 0]));
        let tensor = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 256, 256, 3]);
        assert!((tensor[[0, 10, 10, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 10, 10, 1]], 0.0);
    }
}
