mod disk;
mod transfer;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use disk::{DEFAULT_WEB_BASE, DiskSink};
pub use transfer::{TransferClient, TransferConfig, TransferError};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("api error: {0}")]
    Api(#[from] disk_core::DiskError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("upload did not complete: {0}")]
    Incomplete(UploadStatus),
    #[error("invalid object path: {0}")]
    InvalidPath(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Api(err) => err.is_retryable(),
            SinkError::Transfer(_) | SinkError::Incomplete(_) => true,
            SinkError::InvalidPath(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub id: String,
    pub name: String,
    pub content_hash: Option<String>,
    pub size: u64,
    pub web_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Completed,
    /// Accepted by the sink but not yet finalized.
    Processing,
    Failed(String),
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Completed => f.write_str("completed"),
            UploadStatus::Processing => f.write_str("processing"),
            UploadStatus::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Hierarchical object store that receives archived files.
///
/// Container ids are opaque; `None` as a parent means the top level. Listings
/// never include trashed entries.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn list_containers(&self, parent: Option<&str>) -> Result<Vec<Container>, SinkError>;

    async fn create_container(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Container, SinkError>;

    async fn find_object(
        &self,
        name: &str,
        parent: &str,
    ) -> Result<Option<StoredObject>, SinkError>;

    async fn create_object(
        &self,
        name: &str,
        parent: &str,
        local: &Path,
        mime_type: &str,
    ) -> Result<UploadStatus, SinkError>;

    async fn update_object(
        &self,
        object: &StoredObject,
        local: &Path,
        mime_type: &str,
    ) -> Result<UploadStatus, SinkError>;

    /// Reads a document from the application's private area.
    async fn read_private(&self, name: &str) -> Result<Option<Vec<u8>>, SinkError>;

    async fn write_private(&self, name: &str, bytes: Vec<u8>) -> Result<(), SinkError>;
}

/// Content type announced for an upload, by file extension.
pub fn mime_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_type_by_extension() {
        assert_eq!(mime_type_for("IMG_0001.JPG"), "image/jpeg");
        assert_eq!(mime_type_for("clip.mp4"), "video/mp4");
        assert_eq!(mime_type_for("README"), "application/octet-stream");
    }
}
