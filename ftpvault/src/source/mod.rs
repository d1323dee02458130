mod enumerator;
mod opendal_source;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

pub use enumerator::{Enumeration, SourceEnumerator};
pub use opendal_source::OpendalSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("backend error: {0}")]
    Backend(#[from] opendal::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// One row of a folder listing, before filtering and size lookup.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub name: String,
    pub full_path: String,
    pub kind: EntryKind,
    pub modified: Option<OffsetDateTime>,
}

/// A file that survived enumeration filters for the current pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub source: String,
    pub name: String,
    pub full_path: String,
    pub size: u64,
    pub modified: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Success,
    Failed(String),
}

#[async_trait]
pub trait Source: Send + Sync {
    /// Label used in logs and notifications.
    fn label(&self) -> &str;

    async fn list(&self, folder: &str) -> Result<Vec<ListEntry>, SourceError>;

    async fn size(&self, path: &str) -> Result<u64, SourceError>;

    /// Fetches `path` into `target`. Transport problems are reported as
    /// `DownloadStatus::Failed`, never as an error.
    async fn download(&self, path: &str, target: &Path) -> DownloadStatus;
}
