use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::config::{CloudinaryConfig, ImageStorage};
use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

/// Re-hosts scraped images so pages never hotlink the source site.
pub struct ImageRelocator {
    client: Client,
    storage: ImageStorage,
}

impl ImageRelocator {
    pub fn new(storage: ImageStorage) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self { client, storage })
    }

    /// Returns the stable reference for `image_url`, or `None` when there is
    /// no usable image. Failures are logged and never propagated.
    pub async fn relocate(&self, image_url: Option<&str>) -> Option<String> {
        let Some(url) = image_url.filter(|u| has_accepted_scheme(u)) else {
            tracing::warn!(image_url = ?image_url, "Invalid image URL, skipping");
            return None;
        };

        let result = match &self.storage {
            ImageStorage::Local { dir, public_prefix } => self.download(url, dir, public_prefix).await,
            ImageStorage::Cloudinary(cloud) => self.upload(url, cloud).await,
        };

        match result {
            Ok(reference) => {
                tracing::debug!(%url, %reference, "Saved image");
                Some(reference)
            }
            Err(e) => {
                tracing::error!(%url, error = %e, "Failed to save image");
                None
            }
        }
    }

    async fn download(&self, url: &str, dir: &Path, public_prefix: &str) -> Result<String> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to download image: HTTP {}", response.status()).into());
        }

        tokio::fs::create_dir_all(dir).await?;
        let (path, file_name, mut file) = create_timestamped(dir, &extension_of(url)).await?;

        let written = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<(), AppError>(())
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                tracing::debug!(path = %path.display(), error = %rm, "Failed to remove partial image");
            }
            return Err(e);
        }

        Ok(format!("{}/{}", public_prefix.trim_end_matches('/'), file_name))
    }

    async fn upload(&self, url: &str, cloud: &CloudinaryConfig) -> Result<String> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign(
            &[("folder", cloud.folder.as_str()), ("timestamp", timestamp.as_str())],
            &cloud.api_secret,
        );
        let endpoint = format!(
            "{}/v1_1/{}/image/upload",
            cloud.api_base.trim_end_matches('/'),
            cloud.cloud_name
        );

        let response = self
            .client
            .post(endpoint)
            .form(&[
                ("file", url),
                ("folder", cloud.folder.as_str()),
                ("timestamp", timestamp.as_str()),
                ("api_key", cloud.api_key.as_str()),
                ("signature", signature.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::ImageUpload(format!("HTTP {status}: {error_text}")));
        }

        let uploaded: UploadResponse = response.json().await?;
        Ok(uploaded.secure_url)
    }
}

fn has_accepted_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Open `<millis><ext>` in `dir`, moving the timestamp forward until the
/// name is free.
async fn create_timestamped(dir: &Path, ext: &str) -> Result<(PathBuf, String, File)> {
    let mut stamp = Utc::now().timestamp_millis();
    loop {
        let file_name = format!("{stamp}{ext}");
        let path = dir.join(&file_name);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((path, file_name, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => stamp += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Lowercased extension of the URL's path including the dot, or empty.
fn extension_of(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    Path::new(parsed.path())
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Signed-upload signature: parameters sorted by name, joined as
/// `k=v&k=v`, secret appended, SHA-1 hex digest.
fn sign(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by_key(|(name, _)| *name);
    let to_sign = sorted
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    hex::encode(Sha1::digest(format!("{to_sign}{secret}").as_bytes()))
}
