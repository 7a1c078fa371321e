use actix_web::web::Bytes;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::cache::cache_service::{CacheError, ImageStore};
use crate::cache::models::{CachePolicy, CachedImage};
use crate::upload::secure_filename;

#[derive(Debug, thiserror::Error)]
pub enum DiskServiceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid file name: {0}")]
    InvalidKey(String),
}

// Keeps keys and their staging names well under NAME_MAX.
const MAX_STEM_LEN: usize = 64;

/// Keeps uploads as PNG files under one directory, named
/// `<image id>-<sanitized stem>.png`, and deletes them once they outlive the TTL.
pub struct DiskImageStore {
    upload_dir: PathBuf,
    ttl: Duration,
}

impl DiskImageStore {
    pub fn new(upload_dir: PathBuf, ttl: Duration) -> Result<Self, DiskServiceError> {
        fs::create_dir_all(&upload_dir)?;
        log::info!("Storing uploads in {}", upload_dir.display());
        Ok(Self { upload_dir, ttl })
    }

    pub fn generate_key(image_id: &str, file_name: &str) -> String {
        let secured = secure_filename(file_name);
        let stem = Path::new(&secured)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .map(|stem| stem.chars().take(MAX_STEM_LEN).collect::<String>())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "upload".to_string());
        format!("{}-{}.png", image_id.trim_end_matches(".png"), stem)
    }

    /// Only names this store could have produced are accepted, which rules out
    /// separators and `..`.
    pub fn validate_key(key: &str) -> Result<(), DiskServiceError> {
        if key.is_empty() || !key.ends_with(".png") || secure_filename(key) != key {
            return Err(DiskServiceError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    pub fn upload_image(&self, image_data: &[u8], key: &str) -> Result<(), DiskServiceError> {
        Self::validate_key(key)?;
        // Write then rename so readers never see a half written file.
        let staging = self
            .upload_dir
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));
        fs::write(&staging, image_data)?;
        fs::rename(&staging, self.upload_dir.join(key))?;
        Ok(())
    }

    pub fn get_image(&self, key: &str) -> Result<Vec<u8>, DiskServiceError> {
        Self::validate_key(key)?;
        Ok(fs::read(self.upload_dir.join(key))?)
    }

    pub fn delete_image(&self, key: &str) -> Result<(), DiskServiceError> {
        Self::validate_key(key)?;
        fs::remove_file(self.upload_dir.join(key))?;
        Ok(())
    }

    fn is_expired(&self, path: &Path) -> io::Result<bool> {
        let modified = fs::metadata(path)?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        Ok(age >= self.ttl)
    }

    fn stored_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.upload_dir)? {
            let path = entry?.path();
            let is_upload = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| Self::validate_key(name).is_ok());
            if is_upload && path.is_file() {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl ImageStore for DiskImageStore {
    fn put(&self, entry: CachedImage) -> Result<String, CacheError> {
        let key = Self::generate_key(&entry.id, &entry.file_name);
        self.upload_image(&entry.png, &key)?;
        Ok(key)
    }

    fn get(&self, _owner: Uuid, image_id: &str) -> Result<Bytes, CacheError> {
        if Self::validate_key(image_id).is_err() {
            log::warn!("Rejected upload name {:?}", image_id);
            return Err(CacheError::CacheMiss);
        }

        match self.is_expired(&self.upload_dir.join(image_id)) {
            Ok(false) => {}
            Ok(true) => {
                if let Err(e) = self.delete_image(image_id) {
                    log::warn!("Failed to delete expired upload {}: {}", image_id, e);
                }
                return Err(CacheError::CacheMiss);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CacheError::CacheMiss),
            Err(e) => return Err(DiskServiceError::Io(e).into()),
        }

        match self.get_image(image_id) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(DiskServiceError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(CacheError::CacheMiss)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn evict_expired(&self) -> usize {
        let files = match self.stored_files() {
            Ok(files) => files,
            Err(e) => {
                log::error!("Failed to list {}: {}", self.upload_dir.display(), e);
                return 0;
            }
        };

        let mut evicted = 0;
        for path in files {
            match self.is_expired(&path) {
                Ok(true) => match fs::remove_file(&path) {
                    Ok(()) => evicted += 1,
                    Err(e) => log::warn!("Failed to delete {}: {}", path.display(), e),
                },
                Ok(false) => {}
                Err(e) => log::warn!("Failed to stat {}: {}", path.display(), e),
            }
        }
        evicted
    }

    fn len(&self) -> usize {
        self.stored_files().map(|files| files.len()).unwrap_or(0)
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::Filesystem
    }

    fn url_prefix(&self) -> &'static str {
        "/uploads"
    }
}
