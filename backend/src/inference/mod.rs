pub mod decision;
pub mod model;
pub mod preprocess;
pub mod service;
#[cfg(feature = "torch")]
pub mod torch;

pub use decision::{CONFIDENCE_THRESHOLD, ProbabilityDistribution};
pub use model::{LeafClassifier, load_classifier};
pub use preprocess::{NormalizedTensor, preprocess};
pub use service::InferenceService;
