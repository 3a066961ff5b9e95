use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter};

/// Label returned by `POST /predict`.
///
/// The first three variants are the classes the leaf model was trained on, in
/// the order of its output logits. The rest are verdicts produced by the
/// service itself.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
pub enum Prediction {
    Rust,
    Powdery,
    Healthy,
    #[serde(rename = "Invalid Image")]
    #[strum(serialize = "Invalid Image")]
    InvalidImage,
    #[serde(rename = "No file uploaded")]
    #[strum(serialize = "No file uploaded")]
    NoFileUploaded,
    Error,
}

impl Prediction {
    /// Model classes indexed by logit position.
    pub const CLASSES: [Prediction; 3] = [Prediction::Rust, Prediction::Powdery, Prediction::Healthy];
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PredictionResponse {
    pub prediction: Prediction,
    pub confidence: f32,
}

impl PredictionResponse {
    pub fn new(prediction: Prediction, confidence: f32) -> Self {
        Self {
            prediction,
            confidence,
        }
    }

    pub fn no_file_uploaded() -> Self {
        Self::new(Prediction::NoFileUploaded, 0.0)
    }

    pub fn error() -> Self {
        Self::new(Prediction::Error, 0.0)
    }
}
