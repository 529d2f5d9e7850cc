//! Downloading model binaries with progress reporting

use crate::config::ModelLocation;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hf_hub::{api::sync::Api, Repo, RepoType};
use seethrough_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Receives download progress as a percentage in [0, 100]
pub type ProgressSink = Arc<dyn Fn(f32) + Send + Sync>;

/// Fetches model binaries from their canonical location
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Fetch the complete binary, reporting progress along the way
    async fn fetch(&self, location: &ModelLocation, progress: Option<ProgressSink>)
        -> Result<Bytes>;
}

pub(crate) fn report(progress: Option<&ProgressSink>, percent: f32) {
    if let Some(sink) = progress {
        sink(percent.clamp(0.0, 100.0));
    }
}

/// Fetcher for HTTP(S) URLs, local files and Hugging Face Hub locations
#[derive(Debug, Clone)]
pub struct HttpModelFetcher {
    client: reqwest::Client,
}

impl HttpModelFetcher {
    /// `timeout` bounds connecting and each read, not the whole download,
    /// so large binaries on slow links are not cut off while still moving
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Resolve a location into the URL it is downloaded from
    pub fn resolve_url(location: &ModelLocation) -> Result<Option<String>> {
        match location {
            ModelLocation::Url { url } => Ok(Some(url.clone())),
            ModelLocation::Local { .. } => Ok(None),
            ModelLocation::HuggingFace {
                repo,
                revision,
                filename,
            } => {
                let api = Api::new()
                    .map_err(|e| Error::model_load(format!("Failed to create HF API: {}", e)))?;
                let repo = api.repo(Repo::with_revision(
                    repo.clone(),
                    RepoType::Model,
                    revision.clone(),
                ));
                Ok(Some(repo.url(filename)))
            }
        }
    }

    async fn download(&self, url: &str, progress: Option<&ProgressSink>) -> Result<Bytes> {
        info!("Downloading model from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::model_load(format!("Model request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::model_load(format!(
                "Model download failed with status {}",
                response.status()
            )));
        }

        let expected = response.content_length().filter(|&len| len > 0);
        let mut buffer = match expected {
            Some(len) => BytesMut::with_capacity(len as usize),
            None => BytesMut::new(),
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::model_load(format!("Model download interrupted: {}", e)))?;
            buffer.extend_from_slice(&chunk);

            let percent = match expected {
                Some(len) => (buffer.len() as f64 / len as f64 * 100.0) as f32,
                None => 0.0,
            };
            report(progress, percent);
        }

        if let Some(len) = expected {
            if (buffer.len() as u64) < len {
                return Err(Error::model_load(format!(
                    "Model download truncated: received {} of {} bytes",
                    buffer.len(),
                    len
                )));
            }
        }

        debug!("Downloaded {} bytes", buffer.len());
        Ok(buffer.freeze())
    }
}

#[async_trait]
impl ModelFetcher for HttpModelFetcher {
    async fn fetch(
        &self,
        location: &ModelLocation,
        progress: Option<ProgressSink>,
    ) -> Result<Bytes> {
        let progress = progress.as_ref();
        report(progress, 0.0);

        let bytes = match location {
            ModelLocation::Local { path } => {
                info!("Reading model from {}", path.display());
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    Error::model_load(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Bytes::from(bytes)
            }
            other => {
                let url = Self::resolve_url(other)?.ok_or_else(|| {
                    Error::internal(format!("No download URL for {}", other.canonical()))
                })?;
                self.download(&url, progress).await?
            }
        };

        if bytes.is_empty() {
            return Err(Error::model_load("Model binary is empty"));
        }

        report(progress, 100.0);
        Ok(bytes)
    }
}
