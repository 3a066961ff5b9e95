use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use plantguard::config::Config;
use plantguard::inference::{InferenceService, load_classifier};
use plantguard::routes::{RouteSettings, configure_routes};
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };
    log::info!("Configuration: {:?}", config);

    // No model, no traffic: refuse to start rather than fail every request.
    let classifier = match load_classifier(&config.model) {
        Ok(classifier) => classifier,
        Err(e) => {
            log::error!("Failed to load model at startup: {}", e);
            return Err(e.into());
        }
    };

    let service = web::Data::new(InferenceService::new(classifier));
    let settings = RouteSettings::from(&config);
    let bind_address = config.bind_address();

    log::info!("Serving {} on {}", service.describe(), bind_address);
    log::info!("  GET  /        - landing page");
    log::info!("  POST /predict - multipart field `image`");

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allow_any_header()
                    .max_age(3600),
            )
            .configure(|cfg| configure_routes(cfg, service.clone(), settings.clone()))
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
