use actix_multipart::MultipartError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::PredictionResponse;

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("Empty image payload")]
    EmptyImage,
    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Multipart error: {0}")]
    Multipart(String),
    #[error("Model inference error: {0}")]
    Inference(String),
    #[cfg(feature = "torch")]
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),
    #[error("Invalid model output: {0}")]
    InvalidOutput(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PredictError {
    pub fn is_decode_error(&self) -> bool {
        matches!(self, PredictError::EmptyImage | PredictError::Decode(_))
    }
}

// `MultipartError` can wrap a non-`Send` `actix_web::Error`, so only its message is kept.
impl From<MultipartError> for PredictError {
    fn from(err: MultipartError) -> Self {
        PredictError::Multipart(err.to_string())
    }
}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(PredictionResponse::error())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Model loading failed: {0}")]
    ModelLoad(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_yaml::Error> for StartupError {
    fn from(err: serde_yaml::Error) -> Self {
        StartupError::Config(err.to_string())
    }
}

impl From<StartupError> for std::io::Error {
    fn from(err: StartupError) -> Self {
        match err {
            StartupError::Io(e) => e,
            other => std::io::Error::other(other.to_string()),
        }
    }
}
