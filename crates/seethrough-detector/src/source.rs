//! Fetching encoded image bytes from an `ImageSource`

use base64::{engine::general_purpose::STANDARD, Engine};
use seethrough_core::{Error, ImageSource, Result};
use std::time::Duration;

/// Resolves image sources (URLs, data URLs, files, raw bytes) into bytes
#[derive(Debug, Clone)]
pub struct SourceLoader {
    client: reqwest::Client,
}

impl SourceLoader {
    /// Create a loader with its own HTTP client
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Create a loader sharing an existing HTTP client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch the encoded bytes behind `source`
    pub async fn load(&self, source: &ImageSource) -> Result<Vec<u8>> {
        match source {
            ImageSource::Bytes(bytes) => Ok(bytes.clone()),
            ImageSource::Path(path) => tokio::fs::read(path).await.map_err(|e| {
                Error::image_load(format!("Failed to read {}: {}", path.display(), e))
            }),
            ImageSource::Url(url) => self.load_url(url).await,
        }
    }

    async fn load_url(&self, url: &str) -> Result<Vec<u8>> {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("data:") {
            return decode_data_url(url);
        }
        if lower.starts_with("file://") {
            let path = url::Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| Error::image_load(format!("Invalid file URL: {}", url)))?;
            return tokio::fs::read(&path).await.map_err(|e| {
                Error::image_load(format!("Failed to read {}: {}", path.display(), e))
            });
        }

        tracing::debug!("Fetching image from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::image_load(format!("Image request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::image_load(format!(
                "Image request to {} failed with status {}",
                url,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::image_load(format!("Failed to read image body: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

/// Decode a base64 `data:` URL
fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let (header, payload) = url
        .split_once(',')
        .ok_or_else(|| Error::image_load("Malformed data URL: missing ','"))?;

    if !header.to_ascii_lowercase().ends_with(";base64") {
        return Err(Error::image_load(
            "Unsupported data URL encoding: only base64 image data is accepted",
        ));
    }

    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| Error::image_load(format!("Invalid base64 in data URL: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> SourceLoader {
        SourceLoader::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_bytes_pass_through() {
        let bytes = loader().load(&ImageSource::Bytes(vec![1, 2, 3])).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_data_url() {
        let url = format!("data:image/png;base64,{}", STANDARD.encode([9u8, 8, 7]));
        let bytes = loader().load(&ImageSource::Url(url)).await.unwrap();
        assert_eq!(bytes, vec![9, 8, 7]);
    }

    #[tokio::test]
    async fn test_malformed_data_urls() {
        for url in [
            "data:image/png;base64",
            "data:image/svg+xml,<svg/>",
            "data:image/png;base64,!!!not-base64!!!",
        ] {
            let err = loader().load(&ImageSource::Url(url.to_string())).await.unwrap_err();
            assert!(matches!(err, Error::ImageLoad(_)), "{}", url);
        }
    }

    #[tokio::test]
    async fn test_paths_and_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        std::fs::write(&path, [4u8, 5, 6]).unwrap();

        let bytes = loader().load(&ImageSource::Path(path.clone())).await.unwrap();
        assert_eq!(bytes, vec![4, 5, 6]);

        let file_url = url::Url::from_file_path(&path).unwrap().to_string();
        let bytes = loader().load(&ImageSource::Url(file_url)).await.unwrap();
        assert_eq!(bytes, vec![4, 5, 6]);

        let err = loader()
            .load(&ImageSource::Path(dir.path().join("missing.png")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImageLoad(_)));
    }
}
