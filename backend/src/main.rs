mod cache;
mod config;
mod error;
mod inference;
mod routes;
mod session;
mod storage;
mod ui;
mod upload;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use cache::cache_service::CacheService;
use cache::models::CachePolicy;
use config::AppConfig;
use inference::model::Model;
use routes::configure_routes;
use std::io;

fn spawn_cache_sweeper(cache: CacheService, config: &AppConfig) {
    let period = config.cache.sweep_interval();
    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(period);
        loop {
            interval.tick().await;
            let store = cache.clone();
            match web::block(move || store.evict_expired()).await {
                Ok(0) => {}
                Ok(evicted) => log::info!("Evicted {} expired cached images", evicted),
                Err(e) => log::error!("Cache sweep failed: {}", e),
            }
        }
    });
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let model = Model::load(&config.model).map_err(|e| {
        log::error!("Failed to load model at startup: {}", e);
        io::Error::other(format!("Model loading failed: {}", e))
    })?;
    log::info!("Loaded model {}", model.name());

    let cache_service = CacheService::from_config(&config.cache).map_err(|e| {
        log::error!("Failed to initialize image cache: {}", e);
        io::Error::other(e.to_string())
    })?;
    if cache_service.policy() == CachePolicy::Global {
        log::warn!(
            "Image cache policy is global: concurrent uploads replace each other's images"
        );
    }
    spawn_cache_sweeper(cache_service.clone(), &config);

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    let model = web::Data::new(model);
    let cache_service = web::Data::new(cache_service);
    let config = web::Data::new(config);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .app_data(model.clone())
            .app_data(cache_service.clone())
            .app_data(config.clone())
            .configure(|cfg| configure_routes(cfg, &config))
    })
    .bind(&bind_address)?
    .run()
    .await
}
