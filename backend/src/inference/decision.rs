use shared::{Prediction, PredictionResponse};

use crate::error::PredictError;

pub const NUM_CLASSES: usize = Prediction::CLASSES.len();

/// Top-class probabilities strictly below this are reported as `Invalid Image`.
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Softmax over the model's logits, in `Prediction::CLASSES` order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityDistribution([f32; NUM_CLASSES]);

impl ProbabilityDistribution {
    pub fn from_logits(logits: &[f32]) -> Result<Self, PredictError> {
        let logits: [f32; NUM_CLASSES] = logits.try_into().map_err(|_| {
            PredictError::InvalidOutput(format!(
                "expected {} logits, got {}",
                NUM_CLASSES,
                logits.len()
            ))
        })?;
        if let Some(bad) = logits.iter().find(|v| !v.is_finite()) {
            return Err(PredictError::InvalidOutput(format!(
                "non-finite logit {} in {:?}",
                bad, logits
            )));
        }

        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps = logits.map(|v| (v - max).exp());
        let sum: f32 = exps.iter().sum();
        Ok(Self(exps.map(|v| v / sum)))
    }

    pub fn probabilities(&self) -> &[f32; NUM_CLASSES] {
        &self.0
    }

    /// Most likely class and its probability; ties go to the earlier class.
    pub fn top(&self) -> (Prediction, f32) {
        let mut best = (Prediction::CLASSES[0], self.0[0]);
        for (&class, &p) in Prediction::CLASSES.iter().zip(&self.0).skip(1) {
            if p > best.1 {
                best = (class, p);
            }
        }
        best
    }

    pub fn decide(&self) -> PredictionResponse {
        let (class, confidence) = self.top();
        decide(class, confidence)
    }
}

/// Applies the confidence gate to the most likely class.
pub fn decide(class: Prediction, confidence: f32) -> PredictionResponse {
    if confidence < CONFIDENCE_THRESHOLD {
        PredictionResponse::new(Prediction::InvalidImage, confidence)
    } else {
        PredictionResponse::new(class, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_distribution(dist: &ProbabilityDistribution) {
        let p = dist.probabilities();
        assert!(p.iter().all(|v| *v >= 0.0));
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5, "{:?}", p);
    }

    #[test]
    fn softmax_is_a_distribution() {
        let cases: [[f32; NUM_CLASSES]; 5] = [
            [0.0, 0.0, 0.0],
            [1.0, 2.0, 3.0],
            [-5.0, 0.5, 12.0],
            [1000.0, -1000.0, 999.0],
            [-3.4e38, 0.0, 3.4e38],
        ];
        for logits in cases {
            assert_distribution(&ProbabilityDistribution::from_logits(&logits).unwrap());
        }
    }

    #[test]
    fn equal_logits_are_uniform() {
        let dist = ProbabilityDistribution::from_logits(&[4.2, 4.2, 4.2]).unwrap();
        for p in dist.probabilities() {
            assert!((p - 1.0 / 3.0).abs() < 1e-6);
        }
        assert_eq!(dist.top().0, Prediction::Rust);
    }

    #[test]
    fn softmax_matches_known_values() {
        let dist = ProbabilityDistribution::from_logits(&[1.0, 2.0, 3.0]).unwrap();
        let expected: [f32; NUM_CLASSES] = [0.090_030_57, 0.244_728_48, 0.665_240_94];
        for (p, e) in dist.probabilities().iter().zip(expected) {
            assert!((p - e).abs() < 1e-6);
        }
        assert_eq!(dist.top().0, Prediction::Healthy);
    }

    #[test]
    fn wrong_logit_count_is_rejected() {
        let err = ProbabilityDistribution::from_logits(&[0.1, 0.2]).unwrap_err();
        assert!(matches!(err, PredictError::InvalidOutput(_)));
        assert!(ProbabilityDistribution::from_logits(&[0.0; 4]).is_err());
    }

    #[test]
    fn non_finite_logits_are_rejected() {
        assert!(ProbabilityDistribution::from_logits(&[f32::NAN, 0.0, 0.0]).is_err());
        assert!(ProbabilityDistribution::from_logits(&[0.0, f32::INFINITY, 0.0]).is_err());
    }

    #[test]
    fn threshold_itself_is_accepted() {
        assert_eq!(
            decide(Prediction::Rust, 0.6),
            PredictionResponse::new(Prediction::Rust, 0.6)
        );
    }

    #[test]
    fn just_below_threshold_is_invalid() {
        assert_eq!(
            decide(Prediction::Powdery, 0.5999),
            PredictionResponse::new(Prediction::InvalidImage, 0.5999)
        );
    }

    #[test]
    fn just_above_threshold_keeps_the_class() {
        let response = decide(Prediction::Healthy, 0.6001);
        assert_eq!(response, PredictionResponse::new(Prediction::Healthy, 0.6001));
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"prediction":"Healthy","confidence":0.6001}"#
        );
    }

    #[test]
    fn top_class_follows_logit_order() {
        for (index, class) in Prediction::CLASSES.into_iter().enumerate() {
            let mut logits = [0.0_f32; NUM_CLASSES];
            logits[index] = 4.0;
            let dist = ProbabilityDistribution::from_logits(&logits).unwrap();
            assert_eq!(dist.top().0, class);
            assert_eq!(dist.decide().prediction, class);
        }
    }

    #[test]
    fn tie_for_first_goes_to_the_earlier_class() {
        let dist = ProbabilityDistribution::from_logits(&[0.0, 3.0, 3.0]).unwrap();
        assert_eq!(dist.top().0, Prediction::Powdery);
    }

    #[test]
    fn confident_distribution_picks_the_top_class() {
        let dist = ProbabilityDistribution::from_logits(&[0.1, 5.0, 0.3]).unwrap();
        let response = dist.decide();
        assert_eq!(response.prediction, Prediction::Powdery);
        assert!(response.confidence > 0.9);
    }

    #[test]
    fn uncertain_distribution_is_invalid() {
        let dist = ProbabilityDistribution::from_logits(&[1.0, 1.2, 0.9]).unwrap();
        let response = dist.decide();
        assert_eq!(response.prediction, Prediction::InvalidImage);
        assert_eq!(response.confidence, dist.top().1);
    }
}
