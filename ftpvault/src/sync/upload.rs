use std::fmt;
use std::path::Path;

use thiserror::Error;

use super::context::RunContext;
use super::ledger::{DayStamp, LedgerEntry, LedgerError, LedgerKey};
use super::paths::PathError;
use super::planner::FetchReason;
use super::verify::{Verdict, hash_file, verify};
use crate::sink::{SinkError, StoredObject, UploadStatus, mime_type_for};
use crate::source::{DownloadStatus, RemoteItem, Source};

/// Uploads per item per pass: the first one plus one overwrite after a
/// failed verification.
const UPLOAD_ATTEMPTS: usize = 2;

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("transfer limiter is closed")]
    LimiterClosed,
}

impl ItemError {
    /// A confirmation that could not be made durable stops the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ItemError::Ledger(LedgerError::Persist(_)))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ItemError::Sink(err) => err.is_retryable(),
            ItemError::Io(_) => true,
            ItemError::Ledger(_) | ItemError::Path(_) | ItemError::LimiterClosed => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    DownloadFailed(String),
    ShortDownload { expected: u64, actual: u64 },
    UploadIncomplete(UploadStatus),
    HashMismatch {
        local: String,
        remote: Option<String>,
    },
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::DownloadFailed(reason) => write!(f, "download failed: {reason}"),
            RetryReason::ShortDownload { expected, actual } => {
                write!(f, "downloaded {actual} of {expected} bytes")
            }
            RetryReason::UploadIncomplete(status) => write!(f, "upload {status}"),
            RetryReason::HashMismatch { local, remote } => write!(
                f,
                "hash mismatch after upload (local {local}, remote {})",
                remote.as_deref().unwrap_or("absent")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Confirmed,
    /// Left for the next pass; nothing was written to the ledger.
    PendingRetry(RetryReason),
}

/// Fetches the item when asked to, then uploads and verifies it.
pub async fn transfer_item(
    ctx: &RunContext,
    source: &dyn Source,
    item: &RemoteItem,
    local: &Path,
    fetch: Option<FetchReason>,
) -> Result<TransferOutcome, ItemError> {
    if let Some(reason) = fetch {
        ctx.notifier
            .progress(format!("{}: downloading from {} ({reason:?})", item.name, item.source));
        if let DownloadStatus::Failed(reason) = source.download(&item.full_path, local).await {
            return Ok(TransferOutcome::PendingRetry(RetryReason::DownloadFailed(
                reason,
            )));
        }
        let actual = tokio::fs::metadata(local).await?.len();
        if actual != item.size {
            return Ok(TransferOutcome::PendingRetry(RetryReason::ShortDownload {
                expected: item.size,
                actual,
            }));
        }
    }

    upload_and_verify(ctx, item, local).await
}

/// Two-phase upload: put the bytes, then re-read the sink's hash. A ledger
/// entry is only written once the sink reports the locally computed hash.
pub async fn upload_and_verify(
    ctx: &RunContext,
    item: &RemoteItem,
    local: &Path,
) -> Result<TransferOutcome, ItemError> {
    let day = DayStamp::from_datetime(item.modified);
    let container = ctx.hierarchy.resolve_day(&ctx.root_id, &day).await?;
    let local_hash = hash_file(local).await?;

    let mut stored = ctx.sink.find_object(&item.name, &container).await?;
    if let Some(object) = stored.as_ref().filter(|object| {
        verify(&local_hash, object.content_hash.as_deref()) == Verdict::Match
    }) {
        tracing::debug!(name = %item.name, "sink already holds identical object");
        return confirm(ctx, item, day, local, local_hash, object).await;
    }

    let mime_type = mime_type_for(&item.name);
    for attempt in 1..=UPLOAD_ATTEMPTS {
        ctx.notifier
            .progress(format!("{}: uploading (attempt {attempt})", item.name));
        let status = match &stored {
            Some(object) => ctx.sink.update_object(object, local, mime_type).await?,
            None => {
                ctx.sink
                    .create_object(&item.name, &container, local, mime_type)
                    .await?
            }
        };
        if status != UploadStatus::Completed {
            return Ok(TransferOutcome::PendingRetry(
                RetryReason::UploadIncomplete(status),
            ));
        }

        stored = ctx.sink.find_object(&item.name, &container).await?;
        let reported = stored.as_ref().and_then(|o| o.content_hash.as_deref());
        match verify(&local_hash, reported) {
            Verdict::Match => {
                if let Some(object) = &stored {
                    return confirm(ctx, item, day, local, local_hash, object).await;
                }
            }
            verdict => tracing::warn!(
                name = %item.name,
                attempt,
                verdict = ?verdict,
                "uploaded object failed verification"
            ),
        }
    }

    Ok(TransferOutcome::PendingRetry(RetryReason::HashMismatch {
        remote: stored.and_then(|o| o.content_hash),
        local: local_hash,
    }))
}

async fn confirm(
    ctx: &RunContext,
    item: &RemoteItem,
    day: DayStamp,
    local: &Path,
    hash: String,
    object: &StoredObject,
) -> Result<TransferOutcome, ItemError> {
    let key = LedgerKey::new(item.name.clone(), day);
    ctx.ledger
        .confirm(LedgerEntry::new(key, hash, item.size))
        .await?;

    if let Err(err) = tokio::fs::remove_file(local).await {
        tracing::warn!(path = %local.display(), error = %err, "failed to remove local artifact");
    }
    ctx.notifier
        .announce(format!("<{}|{}>: upload completed", object.web_link, item.name));
    Ok(TransferOutcome::Confirmed)
}
