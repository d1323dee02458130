use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::sink::{Sink, SinkError};

/// Name of the ledger document in the sink's private area.
pub const LEDGER_DOCUMENT: &str = "confirmations.json";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger: {0}")]
    Read(#[source] SinkError),
    #[error("failed to persist ledger: {0}")]
    Persist(#[source] SinkError),
    #[error("ledger document is malformed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode ledger: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Calendar day of a file's modification time, in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DayStamp {
    pub year: String,
    pub month: String,
    pub day: String,
}

impl DayStamp {
    pub fn new(year: impl Into<String>, month: impl Into<String>, day: impl Into<String>) -> Self {
        Self {
            year: year.into(),
            month: month.into(),
            day: day.into(),
        }
    }

    pub fn from_datetime(at: OffsetDateTime) -> Self {
        let utc = at.to_offset(time::UtcOffset::UTC);
        Self {
            year: utc.year().to_string(),
            month: format!("{:02}", u8::from(utc.month())),
            day: format!("{:02}", utc.day()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub file_name: String,
    pub day: DayStamp,
}

impl LedgerKey {
    pub fn new(file_name: impl Into<String>, day: DayStamp) -> Self {
        Self {
            file_name: file_name.into(),
            day,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    #[serde(alias = "FileName")]
    pub file_name: String,
    #[serde(alias = "Year")]
    pub year: String,
    #[serde(alias = "Month")]
    pub month: String,
    #[serde(alias = "Day")]
    pub day: String,
    #[serde(alias = "Hash")]
    pub hash: String,
    #[serde(alias = "FileSize")]
    pub file_size: u64,
}

impl LedgerEntry {
    pub fn new(key: LedgerKey, hash: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: key.file_name,
            year: key.day.year,
            month: key.day.month,
            day: key.day.day,
            hash: hash.into(),
            file_size,
        }
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(
            self.file_name.clone(),
            DayStamp::new(self.year.clone(), self.month.clone(), self.day.clone()),
        )
    }
}

/// Keys confirmed as of the start of a pass. Writes made during the pass are
/// deliberately not visible here.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    keys: HashSet<LedgerKey>,
}

impl LedgerSnapshot {
    pub fn contains(&self, key: &LedgerKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Durable record of verified transfers, kept as one JSON document that is
/// rewritten in full on every change.
pub struct ConfirmationLedger {
    sink: Arc<dyn Sink>,
    entries: Mutex<Vec<LedgerEntry>>,
}

impl ConfirmationLedger {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Re-reads the document, replacing whatever was held in memory.
    pub async fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        let mut entries = self.entries.lock().await;
        let raw = self
            .sink
            .read_private(LEDGER_DOCUMENT)
            .await
            .map_err(LedgerError::Read)?;
        *entries = match raw {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
                serde_json::from_slice(&bytes).map_err(LedgerError::Decode)?
            }
            _ => Vec::new(),
        };
        tracing::debug!(entries = entries.len(), "ledger loaded");
        Ok(LedgerSnapshot {
            keys: entries.iter().map(LedgerEntry::key).collect(),
        })
    }

    /// Records `entry` and persists the document before returning. On a
    /// failed write the entry is dropped again so memory matches the sink.
    pub async fn confirm(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().await;
        let key = entry.key();
        if entries.iter().any(|existing| existing.key() == key) {
            tracing::debug!(file = %entry.file_name, "ledger already has entry");
            return Ok(());
        }

        entries.push(entry);
        if let Err(err) = self.write(&entries).await {
            entries.pop();
            return Err(err);
        }
        Ok(())
    }

    pub async fn persist(&self) -> Result<(), LedgerError> {
        let entries = self.entries.lock().await;
        self.write(&entries).await
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().await.clone()
    }

    async fn write(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec(entries).map_err(LedgerError::Encode)?;
        self.sink
            .write_private(LEDGER_DOCUMENT, bytes)
            .await
            .map_err(LedgerError::Persist)
    }
}
