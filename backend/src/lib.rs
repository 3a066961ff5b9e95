pub mod config;
pub mod error;
pub mod inference;
pub mod routes;

pub use config::Config;
pub use error::{PredictError, StartupError};
pub use inference::InferenceService;
