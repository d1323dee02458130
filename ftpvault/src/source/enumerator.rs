use std::vec::IntoIter;

use super::{EntryKind, ListEntry, RemoteItem, Source, SourceError};

/// Turns a folder listing into the items worth planning.
#[derive(Debug, Clone, Copy)]
pub struct SourceEnumerator {
    skip_dot_files: bool,
}

impl SourceEnumerator {
    pub fn new(skip_dot_files: bool) -> Self {
        Self { skip_dot_files }
    }

    /// Lists `folder` once. The returned enumeration queries sizes lazily as
    /// it is consumed and cannot be restarted.
    pub async fn open<'a>(
        &self,
        source: &'a dyn Source,
        folder: &str,
    ) -> Result<Enumeration<'a>, SourceError> {
        let entries = source.list(folder).await?;
        Ok(Enumeration {
            source,
            entries: entries.into_iter(),
            skip_dot_files: self.skip_dot_files,
        })
    }
}

pub struct Enumeration<'a> {
    source: &'a dyn Source,
    entries: IntoIter<ListEntry>,
    skip_dot_files: bool,
}

impl Enumeration<'_> {
    pub async fn next(&mut self) -> Option<Result<RemoteItem, SourceError>> {
        for entry in self.entries.by_ref() {
            if entry.kind != EntryKind::File {
                continue;
            }
            if self.skip_dot_files && entry.name.starts_with('.') {
                tracing::trace!(name = %entry.name, "skipping dot file");
                continue;
            }

            let size = match self.source.size(&entry.full_path).await {
                Ok(size) => size,
                Err(err) => return Some(Err(err)),
            };
            if size == 0 {
                tracing::debug!(name = %entry.name, "skipping empty file");
                continue;
            }
            let Some(modified) = entry.modified else {
                tracing::warn!(
                    source = self.source.label(),
                    path = %entry.full_path,
                    "skipping file without modification time"
                );
                continue;
            };

            return Some(Ok(RemoteItem {
                source: self.source.label().to_string(),
                name: entry.name,
                full_path: entry.full_path,
                size,
                modified,
            }));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{MemorySource, day};

    async fn drain(enumeration: &mut Enumeration<'_>) -> Vec<RemoteItem> {
        let mut items = Vec::new();
        while let Some(item) = enumeration.next().await {
            items.push(item.unwrap());
        }
        items
    }

    #[tokio::test]
    async fn drops_directories_and_empty_files() {
        let source = MemorySource::new("ftp://a");
        source.add_file("/cam", "photo.jpg", day(2024, 5, 1), b"jpeg");
        source.add_file("/cam", "pending.jpg", day(2024, 5, 1), b"");
        source.add_dir("/cam", "thumbs");

        let mut enumeration = SourceEnumerator::new(true)
            .open(&source, "/cam")
            .await
            .unwrap();
        let items = drain(&mut enumeration).await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "photo.jpg");
        assert_eq!(items[0].size, 4);
        assert_eq!(items[0].source, "ftp://a");
    }

    #[tokio::test]
    async fn dot_files_are_dropped_before_size_lookup() {
        let source = MemorySource::new("ftp://a");
        source.add_file("/cam", ".DS_Store", day(2024, 5, 1), b"junk");
        source.add_file("/cam", "photo.jpg", day(2024, 5, 1), b"jpeg");

        let mut enumeration = SourceEnumerator::new(true)
            .open(&source, "/cam")
            .await
            .unwrap();
        let items = drain(&mut enumeration).await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "photo.jpg");
        assert_eq!(source.size_queries(), vec!["/cam/photo.jpg".to_string()]);
    }

    #[tokio::test]
    async fn dot_files_pass_when_filter_disabled() {
        let source = MemorySource::new("ftp://a");
        source.add_file("/cam", ".hidden", day(2024, 5, 1), b"data");

        let mut enumeration = SourceEnumerator::new(false)
            .open(&source, "/cam")
            .await
            .unwrap();

        assert_eq!(drain(&mut enumeration).await.len(), 1);
    }

    #[tokio::test]
    async fn listing_failure_is_an_error() {
        let source = MemorySource::new("ftp://down");
        source.fail_listing();

        let result = SourceEnumerator::new(true).open(&source, "/cam").await;

        assert!(matches!(result, Err(SourceError::Unavailable(_))));
    }
}
