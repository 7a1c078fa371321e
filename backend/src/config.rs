use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::cache::models::CachePolicy;
use crate::inference::model::InputLayout;

pub const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind_address: String,
    pub port: u16,
    pub static_dir: PathBuf,
    pub model: ModelConfig,
    pub upload: UploadConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub input_layout: InputLayout,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub policy: CachePolicy,
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub upload_dir: PathBuf,
    pub sweep_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8081,
            static_dir: PathBuf::from("static"),
            model: ModelConfig::default(),
            upload: UploadConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("model/chest_xray_cnn.pt"),
            input_layout: InputLayout::Nhwc,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 8 * 1024 * 1024,
            allowed_extensions: ["jpg", "jpeg", "png", "gif"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::Session,
            ttl_secs: 600,
            max_entries: 1024,
            upload_dir: PathBuf::from("uploads"),
            sweep_interval_secs: 60,
        }
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

impl AppConfig {
    /// Loads the YAML file named by `XRAY_CONFIG` (or the default path) and
    /// applies environment overrides on top.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("XRAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("BIND_ADDRESS") {
            self.bind_address = value;
        }
        if let Some(value) = lookup("PORT") {
            self.port = parse_value("PORT", value)?;
        }
        if let Some(value) = lookup("STATIC_DIR") {
            self.static_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("MODEL_PATH") {
            self.model.path = PathBuf::from(value);
        }
        if let Some(value) = lookup("MODEL_INPUT_LAYOUT") {
            self.model.input_layout = parse_value("MODEL_INPUT_LAYOUT", value)?;
        }
        if let Some(value) = lookup("MAX_UPLOAD_BYTES") {
            self.upload.max_bytes = parse_value("MAX_UPLOAD_BYTES", value)?;
        }
        if let Some(value) = lookup("IMAGE_CACHE") {
            self.cache.policy = parse_value("IMAGE_CACHE", value)?;
        }
        if let Some(value) = lookup("IMAGE_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_value("IMAGE_CACHE_TTL_SECS", value)?;
        }
        if let Some(value) = lookup("IMAGE_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = parse_value("IMAGE_CACHE_MAX_ENTRIES", value)?;
        }
        if let Some(value) = lookup("UPLOAD_DIR") {
            self.cache.upload_dir = PathBuf::from(value);
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.upload.max_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "upload.max_bytes",
                value: "0".to_string(),
            });
        }
        self.upload.allowed_extensions = self
            .upload
            .allowed_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if self.upload.allowed_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "upload.allowed_extensions",
                value: String::new(),
            });
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cache.ttl_secs",
                value: "0".to_string(),
            });
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cache.max_entries",
                value: "0".to_string(),
            });
        }
        if self.cache.sweep_interval_secs == 0 {
            self.cache.sweep_interval_secs = 60;
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
