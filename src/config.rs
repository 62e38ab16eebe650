use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::scrape::SourceId;

const APP_DIR: &str = "newscentral";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,

    /// How long a page may take to show its ready selector.
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,

    #[serde(default)]
    pub fetcher: FetcherKind,

    #[serde(default = "default_sources")]
    pub sources: Vec<SourceId>,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub images: ImageStorage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    #[default]
    Browser,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Enrichment is skipped when no key is set.
    pub api_key: Option<String>,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_enrichment_timeout")]
    pub timeout_secs: u64,
}

/// Where relocated images end up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "storage", rename_all = "lowercase")]
pub enum ImageStorage {
    Local {
        #[serde(default = "default_upload_dir")]
        dir: PathBuf,
        #[serde(default = "default_public_prefix")]
        public_prefix: String,
    },
    Cloudinary(CloudinaryConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default = "default_cloudinary_base")]
    pub api_base: String,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("newscentral.db").to_string_lossy().to_string()
}

fn default_refresh_interval() -> u32 {
    60
}

fn default_page_timeout() -> u64 {
    60
}

fn default_sources() -> Vec<SourceId> {
    SourceId::ALL.to_vec()
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_text_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}

fn default_enrichment_timeout() -> u64 {
    60
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("public/uploads")
}

fn default_public_prefix() -> String {
    "/uploads".to_string()
}

fn default_folder() -> String {
    "scraped_images".to_string()
}

fn default_cloudinary_base() -> String {
    "https://api.cloudinary.com".to_string()
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            text_model: default_text_model(),
            embedding_model: default_embedding_model(),
            timeout_secs: default_enrichment_timeout(),
        }
    }
}

impl Default for ImageStorage {
    fn default() -> Self {
        ImageStorage::Local {
            dir: default_upload_dir(),
            public_prefix: default_public_prefix(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            refresh_interval_minutes: default_refresh_interval(),
            page_timeout_secs: default_page_timeout(),
            fetcher: FetcherKind::default(),
            sources: default_sources(),
            enrichment: EnrichmentConfig::default(),
            images: ImageStorage::default(),
        }
    }
}

impl Config {
    /// Load the config file (creating it with defaults on first run), then
    /// apply secrets from the environment.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.sources.is_empty() {
            return Err(AppError::Config("no sources configured".to_string()));
        }
        Ok(config)
    }

    /// Environment values win over the file for secrets and the database
    /// path, so they can stay out of the config file.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("NEWSCENTRAL_DB_PATH") {
            self.db_path = path;
        }
        if let Some(key) = var("GEMINI_API_KEY") {
            self.enrichment.api_key = Some(key);
        }
        if let ImageStorage::Cloudinary(cloud) = &mut self.images {
            if let Some(key) = var("CLOUDINARY_API_KEY") {
                cloud.api_key = key;
            }
            if let Some(secret) = var("CLOUDINARY_API_SECRET") {
                cloud.api_secret = secret;
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("NEWSCENTRAL_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }
}
