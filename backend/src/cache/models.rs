use actix_web::web::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Where the most recent upload is kept between the POST and the image GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CachePolicy {
    /// One slot per browser session.
    Session,
    /// One slot shared by every client; stale ids are never answered.
    Global,
    /// PNG files in the upload directory.
    #[strum(to_string = "filesystem", serialize = "disk")]
    Filesystem,
}

#[derive(Debug, Clone)]
pub struct CachedImage {
    pub id: String,
    pub owner: Uuid,
    pub file_name: String,
    pub png: Bytes,
    pub created_at: Instant,
}

impl CachedImage {
    pub fn new(owner: Uuid, file_name: String, png: Bytes) -> Self {
        Self {
            id: format!("{}.png", Uuid::new_v4().simple()),
            owner,
            file_name,
            png,
            created_at: Instant::now(),
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Handle returned to the page after a successful upload.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub id: String,
    pub url: String,
}
