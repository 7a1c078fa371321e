use image::RgbImage;
use ndarray::Array4;
use serde::Deserialize;
use shared::InferenceResponse;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

use super::preprocess::{decode_image, preprocess, to_rgb};
use crate::config::ModelConfig;
use crate::upload::calculate_image_hash;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Model error: {0}")]
    Model(String),
    #[error("Model returned an invalid probability: {0}")]
    InvalidOutput(f32),
    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

/// Memory order of the tensor handed to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InputLayout {
    Nhwc,
    Nchw,
}

/// A pretrained binary classifier producing the probability of the positive class.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &Array4<f32>) -> Result<f32, InferenceError>;

    fn name(&self) -> &str;
}

#[derive(Clone)]
pub struct Model {
    classifier: Arc<dyn Classifier>,
}

impl Model {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    #[cfg(feature = "torch")]
    pub fn load(config: &ModelConfig) -> Result<Self, InferenceError> {
        let classifier = super::torch::TorchClassifier::load(&config.path, config.input_layout)?;
        Ok(Self::new(Arc::new(classifier)))
    }

    #[cfg(not(feature = "torch"))]
    pub fn load(config: &ModelConfig) -> Result<Self, InferenceError> {
        Err(InferenceError::Unavailable(format!(
            "cannot load {}: built without the `torch` feature",
            config.path.display()
        )))
    }

    pub fn name(&self) -> &str {
        self.classifier.name()
    }

    pub fn inference(&self, image: &RgbImage) -> Result<f32, InferenceError> {
        let tensor = preprocess(image);
        let probability = self.classifier.predict(&tensor)?;
        if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
            return Err(InferenceError::InvalidOutput(probability));
        }
        Ok(probability)
    }

    pub fn calculate_result(&self, probability: f32) -> InferenceResponse {
        InferenceResponse::from_probability(probability)
    }

    /// Decodes, classifies and hashes an uploaded image. The decoded RGB image
    /// is handed back so it can be cached for re-serving.
    pub fn classify_bytes(&self, bytes: &[u8]) -> Result<(RgbImage, InferenceResponse), InferenceError> {
        let image = to_rgb(&decode_image(bytes)?);
        let probability = self.inference(&image)?;
        let mut response = self.calculate_result(probability);
        response.image_hash = Some(calculate_image_hash(bytes));

        log::info!(
            "Classified {}x{} image with {}: {} ({})",
            image.width(),
            image.height(),
            self.name(),
            response.diagnosis,
            response.score
        );
        Ok((image, response))
    }
}
