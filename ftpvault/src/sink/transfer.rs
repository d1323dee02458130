use std::{io, path::Path, sync::Arc};

use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use url::Url;

use super::UploadStatus;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
}

/// Moves bytes to and from the pre-signed links handed out by the disk API.
#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    upload_limit: Arc<Semaphore>,
}

#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    pub upload_concurrency: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: 4,
        }
    }
}

impl TransferClient {
    pub fn new() -> Self {
        Self::with_config(TransferConfig::default())
    }

    pub fn with_config(config: TransferConfig) -> Self {
        Self {
            http: Client::new(),
            upload_limit: Arc::new(Semaphore::new(config.upload_concurrency.max(1))),
        }
    }

    /// Streams `source` to `href`. HTTP failures become `UploadStatus::Failed`;
    /// only local or transport problems are errors.
    pub async fn upload_from_path(
        &self,
        href: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<UploadStatus, TransferError> {
        let _permit = self
            .upload_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;
        let url = Url::parse(href)?;
        let file = tokio::fs::File::open(source).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        Ok(upload_status(response.status()))
    }

    pub async fn upload_bytes(
        &self,
        href: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadStatus, TransferError> {
        let url = Url::parse(href)?;
        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        Ok(upload_status(response.status()))
    }

    pub async fn download_bytes(&self, href: &str) -> Result<Vec<u8>, TransferError> {
        let url = Url::parse(href)?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl Default for TransferClient {
    fn default() -> Self {
        Self::new()
    }
}

fn upload_status(status: StatusCode) -> UploadStatus {
    match status {
        StatusCode::OK | StatusCode::CREATED => UploadStatus::Completed,
        StatusCode::ACCEPTED => UploadStatus::Processing,
        other => UploadStatus::Failed(other.to_string()),
    }
}
