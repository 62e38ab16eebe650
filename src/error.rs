use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Timed out after {secs}s waiting for `{selector}` on {url}")]
    PageTimeout {
        url: String,
        selector: String,
        secs: u64,
    },

    #[error("Selector `{selector}` not found on {url}")]
    SelectorMissing { url: String, selector: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Enrichment API error: {0}")]
    EnrichmentApi(String),

    #[error("Could not parse keywords from model response: {0:?}")]
    KeywordParse(String),

    #[error("Image upload error: {0}")]
    ImageUpload(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
