use actix_web::web::Bytes;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::memory_store::{SessionImageStore, SharedSlotStore};
use crate::cache::models::{CachePolicy, CachedImage, StoredImage};
use crate::config::CacheConfig;
use crate::storage::disk_service::{DiskImageStore, DiskServiceError};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Storage error: {0}")]
    Storage(#[from] DiskServiceError),
    #[error("Cache miss")]
    CacheMiss,
}

/// A single-slot store for the image most recently uploaded by a client.
pub trait ImageStore: Send + Sync {
    /// Stores `entry` as the current image of its owner and returns the id it
    /// can be fetched under.
    fn put(&self, entry: CachedImage) -> Result<String, CacheError>;

    /// Returns the PNG bytes of `image_id` if it is still the live image
    /// visible to `owner`.
    fn get(&self, owner: Uuid, image_id: &str) -> Result<Bytes, CacheError>;

    fn evict_expired(&self) -> usize;

    fn len(&self) -> usize;

    fn policy(&self) -> CachePolicy;

    fn url_prefix(&self) -> &'static str {
        "/images"
    }
}

#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn ImageStore>,
}

impl CacheService {
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self { store }
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let store: Arc<dyn ImageStore> = match config.policy {
            CachePolicy::Session => {
                Arc::new(SessionImageStore::new(config.ttl(), config.max_entries))
            }
            CachePolicy::Global => Arc::new(SharedSlotStore::new(config.ttl())),
            CachePolicy::Filesystem => {
                Arc::new(DiskImageStore::new(config.upload_dir.clone(), config.ttl())?)
            }
        };
        log::info!(
            "Image cache: policy={}, ttl={}s",
            store.policy(),
            config.ttl_secs
        );
        Ok(Self::new(store))
    }

    pub fn encode_png(image: &RgbImage) -> Result<Bytes, CacheError> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(Bytes::from(buffer.into_inner()))
    }

    pub fn cache_image(
        &self,
        owner: Uuid,
        image: &RgbImage,
        file_name: &str,
    ) -> Result<StoredImage, CacheError> {
        let png = Self::encode_png(image)?;
        let entry = CachedImage::new(owner, file_name.to_string(), png);
        let id = self.store.put(entry)?;
        let url = format!("{}/{}", self.store.url_prefix(), id);
        log::debug!("Cached image for session {} at {}", owner, url);
        Ok(StoredImage { id, url })
    }

    pub fn get_cached_image(&self, owner: Uuid, image_id: &str) -> Result<Bytes, CacheError> {
        self.store.get(owner, image_id)
    }

    pub fn evict_expired(&self) -> usize {
        self.store.evict_expired()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn policy(&self) -> CachePolicy {
        self.store.policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::time::Duration;

    fn config(policy: CachePolicy) -> CacheConfig {
        CacheConfig {
            policy,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn cached_png_round_trips_pixels() {
        let cache = CacheService::from_config(&config(CachePolicy::Session)).unwrap();
        let owner = Uuid::new_v4();
        let image = RgbImage::from_fn(20, 10, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 77]));

        let stored = cache.cache_image(owner, &image, "scan.png").unwrap();
        assert_eq!(stored.url, format!("/images/{}", stored.id));

        let png = cache.get_cached_image(owner, &stored.id).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded, image);
    }

    #[test]
    fn global_policy_uses_shared_slot() {
        let cache = CacheService::from_config(&config(CachePolicy::Global)).unwrap();
        assert_eq!(cache.policy(), CachePolicy::Global);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn filesystem_policy_serves_from_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheService::from_config(&CacheConfig {
            policy: CachePolicy::Filesystem,
            upload_dir: dir.path().join("uploads"),
            ..CacheConfig::default()
        })
        .unwrap();

        let stored = cache
            .cache_image(Uuid::new_v4(), &RgbImage::new(3, 3), "my scan.jpg")
            .unwrap();
        assert!(stored.url.starts_with("/uploads/"));
        assert!(stored.id.ends_with("-my_scan.png"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entries_are_swept() {
        let cache = CacheService::new(Arc::new(SessionImageStore::new(Duration::ZERO, 8)));
        let owner = Uuid::new_v4();
        let stored = cache.cache_image(owner, &RgbImage::new(2, 2), "a.png").unwrap();

        assert_eq!(cache.evict_expired(), 1);
        assert!(matches!(
            cache.get_cached_image(owner, &stored.id),
            Err(CacheError::CacheMiss)
        ));
    }
}
