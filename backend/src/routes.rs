use actix_files::{Files, NamedFile};
use actix_multipart::{Multipart, MultipartError};
use actix_web::{HttpResponse, web};
use futures::TryStreamExt;
use log::{error, info, warn};
use shared::PredictionResponse;
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use crate::error::PredictError;
use crate::inference::InferenceService;

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Clone)]
pub struct RouteSettings {
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl From<&Config> for RouteSettings {
    fn from(config: &Config) -> Self {
        Self {
            static_dir: config.static_dir.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

pub fn configure_routes(
    cfg: &mut web::ServiceConfig,
    service: web::Data<InferenceService>,
    settings: RouteSettings,
) {
    let index_path = settings.static_dir.join("index.html");
    let static_dir = settings.static_dir.clone();

    cfg.app_data(service)
        .app_data(web::Data::new(settings))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/").route(web::get().to(move || {
            let index_path = index_path.clone();
            async move { NamedFile::open_async(index_path).await }
        })))
        .service(Files::new("/static", static_dir));
}

async fn predict(
    service: web::Data<InferenceService>,
    settings: web::Data<RouteSettings>,
    mut payload: Multipart,
) -> Result<HttpResponse, PredictError> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();

    let upload = match read_image_field(&mut payload, settings.max_upload_bytes).await {
        Ok(upload) => upload,
        Err(e) => {
            error!("[{}] Failed to read upload: {}", request_id, e);
            return Err(e);
        }
    };

    let Some(image) = upload else {
        info!("[{}] No file uploaded", request_id);
        return Ok(HttpResponse::Ok().json(PredictionResponse::no_file_uploaded()));
    };
    info!("[{}] File received: {} bytes", request_id, image.len());

    let service = service.clone();
    let outcome = match web::block(move || service.predict(&image)).await {
        Ok(result) => result,
        Err(e) => Err(PredictError::Internal(e.to_string())),
    };

    match outcome {
        Ok(response) => {
            info!(
                "[{}] Prediction: {} (confidence {:.4}) in {:.3}s",
                request_id,
                response.prediction,
                response.confidence,
                started.elapsed().as_secs_f32()
            );
            Ok(HttpResponse::Ok().json(response))
        }
        Err(e) => {
            if e.is_decode_error() {
                warn!("[{}] Could not decode upload: {}", request_id, e);
            } else {
                error!("[{}] Prediction failed: {}", request_id, e);
            }
            Err(e)
        }
    }
}

/// Returns the bytes of the first `image` field, or `None` when that field is
/// missing, empty, or was submitted without choosing a file.
async fn read_image_field(
    payload: &mut Multipart,
    limit: usize,
) -> Result<Option<Vec<u8>>, PredictError> {
    let mut image = None;
    let mut seen_image = false;
    let mut fields_read = 0usize;

    loop {
        let mut field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            // A form with no parts is only the closing boundary; the parser calls that incomplete.
            Err(MultipartError::Incomplete) if fields_read == 0 => {
                log::debug!("Multipart form has no fields");
                break;
            }
            Err(e) => return Err(e.into()),
        };
        fields_read += 1;

        let wanted = !seen_image && field.name() == Some(IMAGE_FIELD);
        let chose_file = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .is_none_or(|name| !name.is_empty());

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if !wanted {
                continue;
            }
            let size = data.len() + chunk.len();
            if size > limit {
                return Err(PredictError::PayloadTooLarge { size, limit });
            }
            data.extend_from_slice(&chunk);
        }

        if wanted {
            seen_image = true;
            if chose_file && !data.is_empty() {
                image = Some(data);
            }
        } else {
            log::debug!("Ignoring multipart field {:?}", field.name());
        }
    }

    Ok(image)
}
