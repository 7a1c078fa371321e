use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Probability at or above which an image is labelled `Pneumonia`.
pub const PNEUMONIA_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum Diagnosis {
    Normal,
    Pneumonia,
}

impl Diagnosis {
    pub fn from_probability(probability: f32) -> Self {
        if probability >= PNEUMONIA_THRESHOLD {
            Diagnosis::Pneumonia
        } else {
            Diagnosis::Normal
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct InferenceRequest {
    pub image_data: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InferenceResponse {
    pub probability: f32,
    pub diagnosis: Diagnosis,
    pub score: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_hash: Option<String>,
}

impl InferenceResponse {
    pub fn from_probability(probability: f32) -> Self {
        Self {
            probability,
            diagnosis: Diagnosis::from_probability(probability),
            score: format!("{:.2}", probability),
            image_hash: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundary_is_positive() {
        assert_eq!(Diagnosis::from_probability(0.5), Diagnosis::Pneumonia);
        assert_eq!(Diagnosis::from_probability(0.4999), Diagnosis::Normal);
        assert_eq!(Diagnosis::from_probability(1.0), Diagnosis::Pneumonia);
        assert_eq!(Diagnosis::from_probability(0.0), Diagnosis::Normal);
    }

    #[test]
    fn score_has_two_decimals() {
        assert_eq!(InferenceResponse::from_probability(0.876).score, "0.88");
        assert_eq!(InferenceResponse::from_probability(0.0).score, "0.00");
        assert_eq!(InferenceResponse::from_probability(1.0).score, "1.00");
    }

    #[test]
    fn diagnosis_displays_label() {
        assert_eq!(Diagnosis::Pneumonia.to_string(), "Pneumonia");
        assert_eq!("Normal".parse::<Diagnosis>().unwrap(), Diagnosis::Normal);
    }
}
