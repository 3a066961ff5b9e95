use std::sync::Arc;

use shared::PredictionResponse;

use crate::error::PredictError;
use crate::inference::decision::ProbabilityDistribution;
use crate::inference::model::LeafClassifier;
use crate::inference::preprocess::{NormalizedTensor, preprocess};

/// The loaded model plus the decision policy around it. Built once at startup
/// and shared by every request handler.
#[derive(Clone)]
pub struct InferenceService {
    classifier: Arc<dyn LeafClassifier>,
}

impl InferenceService {
    pub fn new(classifier: Arc<dyn LeafClassifier>) -> Self {
        Self { classifier }
    }

    pub fn classify(&self, tensor: &NormalizedTensor) -> Result<PredictionResponse, PredictError> {
        let logits = self.classifier.logits(tensor)?;
        let distribution = ProbabilityDistribution::from_logits(&logits)?;
        log::debug!(
            "Logits {:?} -> probabilities {:?}",
            logits,
            distribution.probabilities()
        );
        Ok(distribution.decide())
    }

    pub fn predict(&self, image: &[u8]) -> Result<PredictionResponse, PredictError> {
        let tensor = preprocess(image)?;
        self.classify(&tensor)
    }

    pub fn describe(&self) -> String {
        self.classifier.describe()
    }
}
