use std::sync::Arc;

use crate::config::ModelConfig;
use crate::error::{PredictError, StartupError};
use crate::inference::preprocess::NormalizedTensor;

/// A loaded leaf model. Implementations must be safe to call from several
/// request threads at once and must not change between calls.
pub trait LeafClassifier: Send + Sync {
    /// Raw class scores in `Prediction::CLASSES` order.
    fn logits(&self, input: &NormalizedTensor) -> Result<Vec<f32>, PredictError>;

    fn describe(&self) -> String;
}

/// Loads the model named by `config`. Called once, before the server binds.
pub fn load_classifier(config: &ModelConfig) -> Result<Arc<dyn LeafClassifier>, StartupError> {
    if !config.path.exists() {
        return Err(StartupError::ModelLoad(format!(
            "Model file not found: {}",
            config.path.display()
        )));
    }

    log::info!(
        "Loading {} model from: {}",
        config.format,
        config.path.display()
    );
    let classifier = load_backend(config)?;
    log::info!("Model loaded: {}", classifier.describe());
    Ok(classifier)
}

#[cfg(feature = "torch")]
fn load_backend(config: &ModelConfig) -> Result<Arc<dyn LeafClassifier>, StartupError> {
    use crate::config::ModelFormat;
    use crate::inference::torch::{ResNet18Classifier, TorchScriptClassifier, select_device};

    let device = select_device(config.device);
    let classifier: Arc<dyn LeafClassifier> = match config.format {
        ModelFormat::TorchScript => Arc::new(TorchScriptClassifier::load(&config.path, device)?),
        ModelFormat::ResNet18 => Arc::new(ResNet18Classifier::load(&config.path, device)?),
    };
    Ok(classifier)
}

#[cfg(not(feature = "torch"))]
fn load_backend(config: &ModelConfig) -> Result<Arc<dyn LeafClassifier>, StartupError> {
    Err(StartupError::ModelLoad(format!(
        "cannot load {} model: built without the `torch` feature",
        config.format
    )))
}
