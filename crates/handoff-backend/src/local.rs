//! On-device hand-landmark network
//!
//! Runs a MediaPipe-layout ONNX landmark model with tract: one NCHW RGB input
//! of `[1, 3, S, S]` with values in `0..=1`, a `[1, 63]` output of landmarks
//! in input pixels and a `[1, 1]` hand-presence score.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use handoff_core::{BackendError, HandPose, LocalConfig, Pose, LANDMARK_VALUES};

use crate::InferenceBackend;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// In-process landmark inference
#[derive(Clone)]
pub struct LocalBackend {
    plan: Arc<Plan>,
    /// Square input side
    input_size: u32,
    /// Presence score below which the frame counts as "no hand"
    min_confidence: f32,
}

impl LocalBackend {
    /// Load and optimize the network named in `config`
    pub fn load(config: &LocalConfig) -> Result<Self, BackendError> {
        let size = config.input_size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(&config.model_path)
            .and_then(|model| model.with_input_fact(0, f32::fact([1, 3, size, size]).into()))
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| {
                BackendError::Unavailable(format!(
                    "failed to load {}: {}",
                    config.model_path.display(),
                    e
                ))
            })?;

        tracing::info!(
            model = %config.model_path.display(),
            input_size = config.input_size,
            "local landmark network loaded"
        );

        Ok(LocalBackend {
            plan: Arc::new(plan),
            input_size: config.input_size,
            min_confidence: config.min_detection_confidence,
        })
    }

    /// Override the presence threshold
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    fn to_input(&self, image: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = imageops::resize(image, size, size, FilterType::Triangle);
        let s = size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, s, s), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
        .into()
    }
}

impl InferenceBackend for LocalBackend {
    async fn detect(&self, image: &RgbImage) -> Result<Pose, BackendError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BackendError::DecodeFailure("empty frame".into()));
        }

        let input = self.to_input(image);
        let plan = Arc::clone(&self.plan);
        let size = self.input_size as f32;
        let min_confidence = self.min_confidence;

        // CPU-bound; keep it off the async workers
        tokio::task::spawn_blocking(move || run(&plan, input, size, min_confidence))
            .await
            .map_err(|e| BackendError::Unavailable(format!("inference task failed: {}", e)))?
    }
}

fn run(plan: &Plan, input: Tensor, size: f32, min_confidence: f32) -> Result<Pose, BackendError> {
    let outputs = plan.run(tvec!(input.into())).map_err(unavailable)?;
    if outputs.len() < 2 {
        return Err(BackendError::Unavailable(format!(
            "model produced {} outputs, expected landmarks and presence",
            outputs.len()
        )));
    }

    let landmarks: Vec<f32> = outputs[0]
        .to_array_view::<f32>()
        .map_err(unavailable)?
        .iter()
        .copied()
        .collect();
    let presence = outputs[1]
        .to_array_view::<f32>()
        .map_err(unavailable)?
        .iter()
        .next()
        .copied()
        .unwrap_or(0.0);

    interpret(&landmarks, presence, size, min_confidence)
}

fn unavailable(err: impl std::fmt::Display) -> BackendError {
    BackendError::Unavailable(err.to_string())
}

/// Turn raw network output into a pose normalised to the frame
fn interpret(raw: &[f32], presence: f32, size: f32, min_confidence: f32) -> Result<Pose, BackendError> {
    if raw.len() != LANDMARK_VALUES {
        return Err(BackendError::Unavailable(format!(
            "model produced {} landmark values, expected {}",
            raw.len(),
            LANDMARK_VALUES
        )));
    }
    if presence < min_confidence {
        return Ok(Pose::Absent);
    }

    let normalised: Vec<f32> = raw.iter().map(|v| v / size).collect();
    HandPose::from_values(&normalised)
        .map(Pose::Hand)
        .ok_or_else(|| BackendError::Unavailable("malformed landmark output".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use handoff_core::HandLandmark;

    #[test]
    fn test_low_presence_is_absent() {
        let raw = [112.0f32; LANDMARK_VALUES];
        let pose = interpret(&raw, 0.2, 224.0, 0.5).unwrap();
        assert_eq!(pose, Pose::Absent);
    }

    #[test]
    fn test_landmarks_normalised_by_input_size() {
        let mut raw = [0.0f32; LANDMARK_VALUES];
        // Wrist at the input center
        raw[0] = 112.0;
        raw[1] = 112.0;
        raw[2] = 22.4;
        let pose = interpret(&raw, 0.9, 224.0, 0.5).unwrap();

        let wrist = pose.landmark(HandLandmark::Wrist).unwrap();
        assert!((wrist.x - 0.5).abs() < 1e-6);
        assert!((wrist.y - 0.5).abs() < 1e-6);
        assert!((wrist.z - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_output_shape_is_unavailable() {
        let raw = [1.0f32; 42];
        assert!(matches!(
            interpret(&raw, 0.9, 224.0, 0.5),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let config = LocalConfig {
            model_path: PathBuf::from("does/not/exist.onnx"),
            ..LocalConfig::default()
        };
        assert!(matches!(LocalBackend::load(&config), Err(BackendError::Unavailable(_))));
    }
}
