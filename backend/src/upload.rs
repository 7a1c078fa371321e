use actix_multipart::Multipart;
use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::error::PayloadError;
use actix_web::http::{Method, StatusCode};
use actix_web::http::header::{CONTENT_LENGTH, ContentType};
use actix_web::middleware::Next;
use actix_web::web::{Bytes, BytesMut};
use actix_web::{Error, HttpMessage, HttpResponse, ResponseError, web};
use futures::{Stream, StreamExt, TryStreamExt, future, stream};
use sha2::{Digest, Sha256};
use std::pin::Pin;
use unicode_normalization::UnicodeNormalization;

use crate::config::AppConfig;
use crate::ui::{self, IndexView};

pub const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("Malformed upload: {0}")]
    Multipart(String),
}

impl ResponseError for UploadError {
    fn status_code(&self) -> StatusCode {
        match self {
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Multipart(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            UploadError::TooLarge { limit } => format!(
                "The uploaded file is too large. The limit is {} MiB.",
                limit / (1024 * 1024)
            ),
            UploadError::Multipart(_) => "The upload could not be read. Please try again.".to_string(),
        };
        HttpResponse::build(self.status_code())
            .content_type(ContentType::html())
            .body(ui::render_index(&IndexView::error(message)))
    }
}

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

pub fn calculate_image_hash(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

/// `true` when `file_name` carries one of the accepted extensions.
pub fn allowed_file(file_name: &str, allowed_extensions: &[String]) -> bool {
    match file_name.rsplit_once('.') {
        Some((_, extension)) => {
            let extension = extension.to_ascii_lowercase();
            allowed_extensions.iter().any(|allowed| *allowed == extension)
        }
        None => false,
    }
}

/// Reduces a client supplied filename to a safe ASCII name: accents are
/// transliterated, path separators and whitespace become `_`, anything else outside
/// `[A-Za-z0-9_.-]` is dropped and leading or trailing dots and underscores
/// are trimmed. The result may be empty.
pub fn secure_filename(file_name: &str) -> String {
    let ascii: String = file_name
        .nfkd()
        .filter(char::is_ascii)
        .map(|ch| if matches!(ch, '/' | '\\') { ' ' } else { ch })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let secured: String = joined
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
        .collect();
    secured.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Drains the multipart stream and returns the `file` part, if any.
///
/// A part named `file` that carries no `filename` parameter is a plain form
/// value, not an upload, and is skipped.
pub async fn read_upload(
    mut payload: Multipart,
    max_bytes: usize,
) -> Result<Option<UploadedFile>, UploadError> {
    let mut upload = None;
    let mut total = 0usize;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| UploadError::Multipart(e.to_string()))?
    {
        let file_name = match field.content_disposition() {
            Some(disposition) if disposition.get_name() == Some(FILE_FIELD) => {
                disposition.get_filename().map(str::to_string)
            }
            _ => None,
        };

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
            total += chunk.len();
            if total > max_bytes {
                return Err(UploadError::TooLarge { limit: max_bytes });
            }
            data.extend_from_slice(&chunk);
        }

        if upload.is_none() {
            if let Some(file_name) = file_name {
                upload = Some(UploadedFile { file_name, data });
            }
        }
    }

    Ok(upload)
}

fn reject_oversize<B>(
    req: ServiceRequest,
    limit: usize,
    size: &str,
) -> ServiceResponse<EitherBody<B>> {
    log::warn!(
        "Rejecting {} {}: body of {} bytes exceeds {}",
        req.method(),
        req.path(),
        size,
        limit
    );
    let response = UploadError::TooLarge { limit }.error_response();
    req.into_response(response).map_into_right_body()
}

/// Rejects request bodies larger than the upload limit before any handler
/// runs. A declared Content-Length is checked up front; bodies without one
/// are buffered up to the limit and replayed to the handler.
pub async fn limit_body_size<B: MessageBody>(
    mut req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    let limit = req
        .app_data::<web::Data<AppConfig>>()
        .map(|config| config.upload.max_bytes)
        .unwrap_or_else(|| AppConfig::default().upload.max_bytes);

    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    match declared {
        Some(length) if length > limit => {
            return Ok(reject_oversize(req, limit, &length.to_string()));
        }
        Some(_) => {}
        None if req.method() == Method::POST => {
            let mut payload = req.take_payload();
            let mut body = BytesMut::new();
            while let Some(chunk) = payload.next().await {
                let chunk = chunk?;
                if body.len() + chunk.len() > limit {
                    let size = format!("more than {}", body.len() + chunk.len());
                    return Ok(reject_oversize(req, limit, &size));
                }
                body.extend_from_slice(&chunk);
            }
            let replay: Pin<Box<dyn Stream<Item = Result<Bytes, PayloadError>>>> =
                Box::pin(stream::once(future::ready(Ok(body.freeze()))));
            req.set_payload(Payload::Stream { payload: replay });
        }
        None => {}
    }

    next.call(req).await.map(ServiceResponse::map_into_left_body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        AppConfig::default().upload.allowed_extensions
    }

    #[test]
    fn allowed_file_checks_extension_case_insensitively() {
        assert!(allowed_file("chest.PNG", &allowed()));
        assert!(allowed_file("scan.final.jpeg", &allowed()));
        assert!(allowed_file("anim.gif", &allowed()));
        assert!(!allowed_file("scan.bmp", &allowed()));
        assert!(!allowed_file("png", &allowed()));
        assert!(!allowed_file("archive.png.zip", &allowed()));
    }

    #[test]
    fn secure_filename_strips_paths_and_unsafe_characters() {
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\x ray.png"), "C_Users_me_x_ray.png");
        assert_eq!(secure_filename("résumé.png"), "resume.png");
        assert_eq!(secure_filename("  tab\tseparated  name.gif"), "tab_separated_name.gif");
        assert_eq!(secure_filename("my scan (1).jpg"), "my_scan_1.jpg");
        assert_eq!(secure_filename(".hidden.png"), "hidden.png");
        assert_eq!(secure_filename(".."), "");
    }

    #[test]
    fn image_hash_is_hex_sha256() {
        let hash = calculate_image_hash(b"abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn too_large_maps_to_413() {
        let err = UploadError::TooLarge { limit: 8 * 1024 * 1024 };
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.error_response().status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
