mod config;
mod error;
mod inference;
mod routes;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use config::AppConfig;
use inference::Classifier;
use routes::{configure_routes, UploadLimit};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Configuration failed: {}", e),
            ));
        }
    };

    log::info!("Loading model {}...", config.model.id);
    let model = match inference::load_classifier(&config.model).await {
        Ok(model) => model,
        Err(e) => {
            log::error!("Failed to load model at startup: {}", e);
            return Err(std::io::Error::other(format!("Model loading failed: {}", e)));
        }
    };
    log::info!(
        "Model {} loaded: {} labels on {:?}",
        config.model.id,
        model.labels().len(),
        model.device()
    );

    let classifier: Arc<dyn Classifier> = Arc::new(model);
    let upload_limit = UploadLimit(config.server.max_upload_bytes);
    let bind_address = config.bind_address();

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::from(classifier.clone()))
            .app_data(web::Data::new(upload_limit))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
