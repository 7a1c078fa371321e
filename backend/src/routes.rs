use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::http::header::{self, ContentType};
use actix_web::middleware::from_fn;
use actix_web::{HttpMessage, HttpRequest, HttpResponse, web};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{error, info, warn};
use serde_json::json;
use shared::InferenceRequest;

use crate::cache::cache_service::{CacheError, CacheService};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::inference::model::{InferenceError, Model};
use crate::session::{SessionId, SessionMiddleware};
use crate::ui::{self, IndexView};
use crate::upload::{
    UploadError, allowed_file, limit_body_size, read_upload, secure_filename,
};

pub fn configure_routes(cfg: &mut web::ServiceConfig, config: &AppConfig) {
    let max_bytes = config.upload.max_bytes;
    // base64 inflates the image by a third
    let json_limit = max_bytes / 3 * 4 + 4096;

    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(
            web::resource("/api/inference")
                .app_data(
                    web::JsonConfig::default()
                        .limit(json_limit)
                        .error_handler(move |err, _req| ApiError::from_json(err, max_bytes).into()),
                )
                .route(web::post().to(handle_api_inference)),
        )
        .service(Files::new("/static", &config.static_dir))
        .service(
            web::scope("")
                .wrap(from_fn(limit_body_size))
                .wrap(SessionMiddleware)
                .service(
                    web::resource("/")
                        .route(web::get().to(index))
                        .route(web::post().to(handle_upload)),
                )
                .service(web::resource("/images/{image_id}").route(web::get().to(serve_image)))
                .service(web::resource("/uploads/{image_id}").route(web::get().to(serve_image))),
        );
}

fn render(status: StatusCode, view: &IndexView) -> HttpResponse {
    HttpResponse::build(status)
        .content_type(ContentType::html())
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .body(ui::render_index(view))
}

fn redirect_to_form() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/"))
        .finish()
}

async fn index() -> HttpResponse {
    render(StatusCode::OK, &IndexView::default())
}

async fn handle_upload(
    req: HttpRequest,
    payload: Multipart,
    session: SessionId,
    model: web::Data<Model>,
    cache: web::Data<CacheService>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, UploadError> {
    let is_multipart = req
        .content_type()
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("multipart/form-data"));
    if !is_multipart {
        info!("Upload without multipart body, redirecting to form");
        return Ok(redirect_to_form());
    }

    let upload = match read_upload(payload, config.upload.max_bytes).await? {
        Some(upload) => upload,
        None => {
            info!("Upload without a file part, redirecting to form");
            return Ok(redirect_to_form());
        }
    };

    if upload.file_name.is_empty() {
        info!("Upload with an empty filename, redirecting to form");
        return Ok(redirect_to_form());
    }

    if !allowed_file(&upload.file_name, &config.upload.allowed_extensions) {
        info!("Ignoring upload with unsupported extension: {:?}", upload.file_name);
        let accepted = config.upload.allowed_extensions.join(", ");
        return Ok(render(
            StatusCode::OK,
            &IndexView::notice(format!("Unsupported file type. Accepted types: {}.", accepted)),
        ));
    }

    let file_name = secure_filename(&upload.file_name);
    info!(
        "Received {} ({} bytes) from session {}",
        file_name,
        upload.data.len(),
        session.0
    );

    let data = upload.data;
    let classifier = model.clone();
    let (image, prediction) = match web::block(move || classifier.classify_bytes(&data)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(InferenceError::Decode(e))) => {
            warn!("Could not decode {}: {}", file_name, e);
            return Ok(render(
                StatusCode::BAD_REQUEST,
                &IndexView::error(format!("{} could not be read as an image.", file_name)),
            ));
        }
        Ok(Err(e)) => {
            error!("Model inference error for {}: {}", file_name, e);
            return Ok(render(
                StatusCode::INTERNAL_SERVER_ERROR,
                &IndexView::error("The image could not be analyzed. Please try again later."),
            ));
        }
        Err(e) => {
            error!("Inference task failed for {}: {}", file_name, e);
            return Ok(render(
                StatusCode::INTERNAL_SERVER_ERROR,
                &IndexView::error("The image could not be analyzed. Please try again later."),
            ));
        }
    };

    let owner = session.0;
    let store = cache.clone();
    let cached_name = file_name.clone();
    let image_url = match web::block(move || store.cache_image(owner, &image, &cached_name)).await {
        Ok(Ok(stored)) => {
            info!("Cached {} as {}", file_name, stored.id);
            Some(stored.url)
        }
        Ok(Err(e)) => {
            error!("Failed to cache image {}: {}", file_name, e);
            None
        }
        Err(e) => {
            error!("Cache task failed for {}: {}", file_name, e);
            None
        }
    };

    Ok(render(
        StatusCode::OK,
        &IndexView {
            file_name: Some(file_name),
            prediction: Some(prediction),
            image_url,
            ..IndexView::default()
        },
    ))
}

async fn serve_image(
    path: web::Path<String>,
    session: SessionId,
    cache: web::Data<CacheService>,
) -> HttpResponse {
    let image_id = path.into_inner();
    let store = cache.clone();
    let lookup_id = image_id.clone();

    match web::block(move || store.get_cached_image(session.0, &lookup_id)).await {
        Ok(Ok(png)) => HttpResponse::Ok()
            .content_type("image/png")
            .insert_header((header::CACHE_CONTROL, "no-store, max-age=0"))
            .body(png),
        Ok(Err(CacheError::CacheMiss)) => {
            info!("Image {} not available for session {}", image_id, session.0);
            HttpResponse::NotFound().body("Image not found")
        }
        Ok(Err(e)) => {
            error!("Error retrieving image {}: {}", image_id, e);
            HttpResponse::InternalServerError().body("Error retrieving image")
        }
        Err(e) => {
            error!("Image lookup task failed for {}: {}", image_id, e);
            HttpResponse::InternalServerError().body("Error retrieving image")
        }
    }
}

async fn handle_api_inference(
    request: web::Json<InferenceRequest>,
    model: web::Data<Model>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let encoded = request.image_data.trim();
    // Accept data URLs as produced by FileReader.readAsDataURL.
    let encoded = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let data = BASE64.decode(encoded)?;

    let limit = config.upload.max_bytes;
    if data.len() > limit {
        return Err(ApiError::TooLarge { limit });
    }
    if data.is_empty() {
        return Err(ApiError::BadRequest("image_data is empty".to_string()));
    }

    let classifier = model.clone();
    let (_, response) = web::block(move || classifier.classify_bytes(&data))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(response))
}

async fn health(model: web::Data<Model>, cache: web::Data<CacheService>) -> HttpResponse {
    let store = cache.clone();
    let cached_images = match web::block(move || store.len()).await {
        Ok(count) => count,
        Err(e) => {
            error!("Cache size lookup failed: {}", e);
            0
        }
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "model": model.name(),
        "cache_policy": cache.policy(),
        "cached_images": cached_images,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
