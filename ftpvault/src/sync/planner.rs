use std::path::{Path, PathBuf};

use super::ledger::{DayStamp, LedgerKey, LedgerSnapshot};
use super::paths::{PathError, artifact_path};
use crate::source::RemoteItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    Missing,
    SizeMismatch { local: u64, remote: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Already in the ledger; nothing to do this pass.
    Confirmed,
    /// Upload `local`, fetching it first when `fetch` is set.
    Transfer {
        local: PathBuf,
        fetch: Option<FetchReason>,
    },
    /// A fetch is needed but fetching is disabled.
    Unresolvable { local: PathBuf, reason: FetchReason },
}

pub fn ledger_key_for(item: &RemoteItem) -> LedgerKey {
    LedgerKey::new(item.name.clone(), DayStamp::from_datetime(item.modified))
}

#[derive(Debug, Clone)]
pub struct TransferPlanner {
    download_root: PathBuf,
    fetch_enabled: bool,
}

impl TransferPlanner {
    pub fn new(download_root: impl Into<PathBuf>, fetch_enabled: bool) -> Self {
        Self {
            download_root: download_root.into(),
            fetch_enabled,
        }
    }

    pub async fn plan(
        &self,
        item: &RemoteItem,
        snapshot: &LedgerSnapshot,
    ) -> Result<Plan, PathError> {
        let key = ledger_key_for(item);
        let local = artifact_path(&self.download_root, &key.day, &item.name)?;

        if snapshot.contains(&key) {
            remove_stray_artifact(&local).await;
            return Ok(Plan::Confirmed);
        }

        let fetch = match tokio::fs::metadata(&local).await {
            Ok(meta) if meta.is_file() && meta.len() == item.size => None,
            Ok(meta) => Some(FetchReason::SizeMismatch {
                local: meta.len(),
                remote: item.size,
            }),
            Err(_) => Some(FetchReason::Missing),
        };

        match fetch {
            Some(reason) if !self.fetch_enabled => {
                tracing::warn!(
                    name = %item.name,
                    reason = ?reason,
                    "local artifact unusable and fetching is disabled, skipping"
                );
                Ok(Plan::Unresolvable { local, reason })
            }
            fetch => Ok(Plan::Transfer { local, fetch }),
        }
    }
}

async fn remove_stray_artifact(local: &Path) {
    match tokio::fs::remove_file(local).await {
        Ok(()) => tracing::debug!(path = %local.display(), "removed artifact of confirmed file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %local.display(), error = %err, "failed to remove local artifact")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ledger::{ConfirmationLedger, LedgerEntry};
    use crate::sync::testing::{MemorySink, day};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn artifact(root: &Path) -> PathBuf {
        root.join("2024/05/01/photo.jpg")
    }

    fn place_artifact(root: &Path, bytes: &[u8]) {
        let path = artifact(root);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn item(name: &str, size: u64) -> RemoteItem {
        RemoteItem {
            source: "ftp://cam".into(),
            name: name.into(),
            full_path: format!("/cam/{name}"),
            size,
            modified: day(2024, 5, 1),
        }
    }

    async fn snapshot_with(entries: &[&RemoteItem]) -> LedgerSnapshot {
        let ledger = ConfirmationLedger::new(Arc::new(MemorySink::new()));
        ledger.load().await.unwrap();
        for item in entries {
            ledger
                .confirm(LedgerEntry::new(ledger_key_for(item), "hash", item.size))
                .await
                .unwrap();
        }
        ledger.load().await.unwrap()
    }

    #[tokio::test]
    async fn confirmed_item_removes_stray_artifact() {
        let dir = tempdir().unwrap();
        let photo = item("photo.jpg", 4);
        place_artifact(dir.path(), b"jpeg");
        let snapshot = snapshot_with(&[&photo]).await;

        let plan = TransferPlanner::new(dir.path(), true)
            .plan(&photo, &snapshot)
            .await
            .unwrap();

        assert_eq!(plan, Plan::Confirmed);
        assert!(!artifact(dir.path()).exists());
    }

    #[tokio::test]
    async fn missing_artifact_needs_fetch() {
        let dir = tempdir().unwrap();
        let plan = TransferPlanner::new(dir.path(), true)
            .plan(&item("photo.jpg", 1000), &LedgerSnapshot::default())
            .await
            .unwrap();

        assert_eq!(
            plan,
            Plan::Transfer {
                local: artifact(dir.path()),
                fetch: Some(FetchReason::Missing),
            }
        );
    }

    #[tokio::test]
    async fn short_artifact_is_refetched() {
        let dir = tempdir().unwrap();
        place_artifact(dir.path(), &[0u8; 900]);

        let plan = TransferPlanner::new(dir.path(), true)
            .plan(&item("photo.jpg", 1000), &LedgerSnapshot::default())
            .await
            .unwrap();

        assert!(matches!(
            plan,
            Plan::Transfer {
                fetch: Some(FetchReason::SizeMismatch {
                    local: 900,
                    remote: 1000
                }),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn same_size_artifact_is_ready() {
        let dir = tempdir().unwrap();
        place_artifact(dir.path(), &[0u8; 1000]);

        let plan = TransferPlanner::new(dir.path(), true)
            .plan(&item("photo.jpg", 1000), &LedgerSnapshot::default())
            .await
            .unwrap();

        assert!(matches!(plan, Plan::Transfer { fetch: None, .. }));
    }

    #[tokio::test]
    async fn fetch_disabled_makes_mismatch_unresolvable() {
        let dir = tempdir().unwrap();
        place_artifact(dir.path(), &[0u8; 900]);

        let plan = TransferPlanner::new(dir.path(), false)
            .plan(&item("photo.jpg", 1000), &LedgerSnapshot::default())
            .await
            .unwrap();

        assert!(matches!(plan, Plan::Unresolvable { .. }));
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let dir = tempdir().unwrap();
        let result = TransferPlanner::new(dir.path(), true)
            .plan(&item("../escape", 10), &LedgerSnapshot::default())
            .await;

        assert!(result.is_err());
    }
}
