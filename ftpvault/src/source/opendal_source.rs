use std::path::Path;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use opendal::{EntryMode, Metakey, Operator};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

use super::{DownloadStatus, EntryKind, ListEntry, Source, SourceError};
use crate::settings::FtpSourceSettings;
use crate::sync::paths::partial_path;

const DOWNLOAD_CHUNK: u64 = 4 * 1024 * 1024;

/// A [`Source`] backed by an OpenDAL operator (FTP in production, local
/// filesystem for mirrors and tests).
pub struct OpendalSource {
    operator: Operator,
    label: String,
}

impl OpendalSource {
    pub fn ftp(settings: &FtpSourceSettings) -> Result<Self, SourceError> {
        use opendal::services::Ftp;

        let endpoint = format!("ftp://{}:{}", settings.host, settings.port);
        let mut builder = Ftp::default().endpoint(&endpoint);
        if let Some(user) = settings.user.as_deref() {
            builder = builder.user(user);
        }
        if let Some(password) = settings.password.as_deref() {
            builder = builder.password(password);
        }

        let operator = Operator::new(builder)?.finish();
        Ok(Self {
            operator,
            label: endpoint,
        })
    }

    pub fn fs(root: &Path) -> Result<Self, SourceError> {
        use opendal::services::Fs;

        let root = root.to_string_lossy().to_string();
        let operator = Operator::new(Fs::default().root(&root))?.finish();
        Ok(Self {
            operator,
            label: format!("file://{root}"),
        })
    }

    /// Streams `path` into a `.partial` sibling of `target` and renames it
    /// into place once every byte arrived. The partial file is removed on
    /// every failure.
    async fn download_chunked(&self, path: &str, target: &Path) -> Result<u64, SourceError> {
        let total = self.operator.stat(path).await?.content_length();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = partial_path(target);
        let result = match self.fetch_into(path, &partial, total).await {
            Ok(read) if read == total => tokio::fs::rename(&partial, target)
                .await
                .map_err(SourceError::from),
            Ok(read) => Err(SourceError::Unavailable(format!(
                "short read: expected {total} bytes, got {read}"
            ))),
            Err(err) => Err(err),
        };
        if result.is_err() {
            discard_partial(&partial).await;
        }
        result.map(|()| total)
    }

    async fn fetch_into(&self, path: &str, partial: &Path, total: u64) -> Result<u64, SourceError> {
        let mut file = tokio::fs::File::create(partial).await?;
        let mut offset = 0u64;
        while offset < total {
            let end = (offset + DOWNLOAD_CHUNK).min(total);
            let chunk = self.operator.read_with(path).range(offset..end).await?;
            let bytes = chunk.to_vec();
            if bytes.is_empty() {
                break;
            }
            file.write_all(&bytes).await?;
            offset += bytes.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(offset)
    }
}

async fn discard_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => tracing::debug!(path = %partial.display(), "removed partial download"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %partial.display(), error = %err, "failed to remove partial download")
        }
    }
}

#[async_trait]
impl Source for OpendalSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list(&self, folder: &str) -> Result<Vec<ListEntry>, SourceError> {
        let folder = folder_path(folder);
        let mut lister = self
            .operator
            .lister_with(&folder)
            .metakey(Metakey::Mode | Metakey::LastModified)
            .await?;

        let mut entries = Vec::new();
        while let Some(entry) = lister.try_next().await? {
            let path = entry.path().to_string();
            if path.trim_matches('/') == folder.trim_matches('/') {
                continue;
            }

            let meta = entry.metadata();
            let kind = match meta.mode() {
                EntryMode::FILE => EntryKind::File,
                EntryMode::DIR => EntryKind::Dir,
                EntryMode::Unknown => EntryKind::Other,
            };
            let modified = meta
                .last_modified()
                .and_then(|t| OffsetDateTime::from_unix_timestamp(t.timestamp()).ok());

            entries.push(ListEntry {
                name: entry.name().trim_end_matches('/').to_string(),
                full_path: path,
                kind,
                modified,
            });
        }

        Ok(entries)
    }

    async fn size(&self, path: &str) -> Result<u64, SourceError> {
        Ok(self.operator.stat(path).await?.content_length())
    }

    async fn download(&self, path: &str, target: &Path) -> DownloadStatus {
        match self.download_chunked(path, target).await {
            Ok(bytes) => {
                tracing::debug!(source = %self.label, path, bytes, "download finished");
                DownloadStatus::Success
            }
            Err(err) => DownloadStatus::Failed(err.to_string()),
        }
    }
}

fn folder_path(folder: &str) -> String {
    let trimmed = folder.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{trimmed}/")
    }
}
