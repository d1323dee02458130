//! In-memory collaborators for engine tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use time::{Date, Month, OffsetDateTime};
use tokio_util::sync::CancellationToken;

use crate::notify::{NotificationSink, NotifyError};
use crate::sink::{Container, Sink, SinkError, StoredObject, TransferError, UploadStatus};
use crate::source::{DownloadStatus, EntryKind, ListEntry, Source, SourceError};

pub fn day(year: i32, month: u8, day: u8) -> OffsetDateTime {
    let month = Month::try_from(month).unwrap();
    Date::from_calendar_date(year, month, day)
        .unwrap()
        .with_hms(12, 0, 0)
        .unwrap()
        .assume_utc()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Polls `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

struct MemoryEntry {
    name: String,
    kind: EntryKind,
    modified: Option<OffsetDateTime>,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct SourceState {
    folders: HashMap<String, Vec<MemoryEntry>>,
    fail_listing: bool,
    failing_downloads: usize,
    size_queries: Vec<String>,
    downloads: Vec<String>,
    cancel_on_size: Option<(String, CancellationToken)>,
    failing_size: Option<String>,
}

pub struct MemorySource {
    label: String,
    state: Mutex<SourceState>,
}

impl MemorySource {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: Mutex::new(SourceState::default()),
        }
    }

    pub fn add_file(&self, folder: &str, name: &str, modified: OffsetDateTime, bytes: &[u8]) {
        self.push(
            folder,
            MemoryEntry {
                name: name.to_string(),
                kind: EntryKind::File,
                modified: Some(modified),
                bytes: bytes.to_vec(),
            },
        );
    }

    pub fn add_dir(&self, folder: &str, name: &str) {
        self.push(
            folder,
            MemoryEntry {
                name: name.to_string(),
                kind: EntryKind::Dir,
                modified: None,
                bytes: Vec::new(),
            },
        );
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_listing = true;
    }

    pub fn fail_next_downloads(&self, count: usize) {
        self.state.lock().unwrap().failing_downloads = count;
    }

    /// Makes size queries for `full_path` fail as if the connection dropped.
    pub fn fail_size_query(&self, full_path: &str) {
        self.state.lock().unwrap().failing_size = Some(full_path.to_string());
    }

    /// Cancels `token` when the size of `full_path` is queried.
    pub fn cancel_on_size_query(&self, full_path: &str, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_size = Some((full_path.to_string(), token));
    }

    pub fn size_queries(&self) -> Vec<String> {
        self.state.lock().unwrap().size_queries.clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.state.lock().unwrap().downloads.clone()
    }

    fn push(&self, folder: &str, entry: MemoryEntry) {
        self.state
            .lock()
            .unwrap()
            .folders
            .entry(folder.to_string())
            .or_default()
            .push(entry);
    }

    fn bytes_of(state: &SourceState, full_path: &str) -> Option<Vec<u8>> {
        let (folder, name) = full_path.rsplit_once('/')?;
        state
            .folders
            .get(folder)?
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.bytes.clone())
    }
}

#[async_trait]
impl Source for MemorySource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list(&self, folder: &str) -> Result<Vec<ListEntry>, SourceError> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(SourceError::Unavailable(format!(
                "{} refused the connection",
                self.label
            )));
        }
        Ok(state
            .folders
            .get(folder)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| ListEntry {
                        name: entry.name.clone(),
                        full_path: format!("{folder}/{}", entry.name),
                        kind: entry.kind,
                        modified: entry.modified,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn size(&self, path: &str) -> Result<u64, SourceError> {
        let mut state = self.state.lock().unwrap();
        state.size_queries.push(path.to_string());
        if let Some((trigger, token)) = &state.cancel_on_size {
            if trigger == path {
                token.cancel();
            }
        }
        if state.failing_size.as_deref() == Some(path) {
            return Err(SourceError::Unavailable(format!(
                "{} dropped the connection",
                self.label
            )));
        }
        Self::bytes_of(&state, path)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| SourceError::Unavailable(format!("no such file {path}")))
    }

    async fn download(&self, path: &str, target: &Path) -> DownloadStatus {
        let bytes = {
            let mut state = self.state.lock().unwrap();
            state.downloads.push(path.to_string());
            if state.failing_downloads > 0 {
                state.failing_downloads -= 1;
                return DownloadStatus::Failed("connection reset".into());
            }
            Self::bytes_of(&state, path)
        };
        if let Some(parent) = target.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return DownloadStatus::Failed(err.to_string());
            }
        }
        match bytes {
            Some(bytes) => match tokio::fs::write(target, bytes).await {
                Ok(()) => DownloadStatus::Success,
                Err(err) => DownloadStatus::Failed(err.to_string()),
            },
            None => DownloadStatus::Failed(format!("no such file {path}")),
        }
    }
}

struct MemoryContainer {
    id: String,
    name: String,
    parent: Option<String>,
}

struct MemoryObject {
    id: String,
    name: String,
    parent: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct SinkState {
    next_id: u64,
    containers: Vec<MemoryContainer>,
    objects: Vec<MemoryObject>,
    private: HashMap<String, Vec<u8>>,
    created_containers: usize,
    uploads: usize,
    fail_listings: bool,
    fail_private_writes: bool,
    corrupt_uploads: usize,
    occupy_uploaded_paths: bool,
    statuses: VecDeque<UploadStatus>,
}

fn unavailable(body: &str) -> SinkError {
    SinkError::Api(disk_core::DiskError::Api {
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        body: body.to_string(),
    })
}

impl SinkState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }
}

/// Sink whose listings yield before answering, so unguarded check-then-create
/// races show up as duplicate containers.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<SinkState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&self, name: &str, parent: Option<&str>) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("c");
        state.containers.push(MemoryContainer {
            id: id.clone(),
            name: name.to_string(),
            parent: parent.map(str::to_string),
        });
        id
    }

    pub fn put_object(&self, parent: &str, name: &str, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("o");
        state.objects.push(MemoryObject {
            id,
            name: name.to_string(),
            parent: parent.to_string(),
            bytes: bytes.to_vec(),
        });
    }

    pub fn object_bytes(&self, parent: &str, name: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .find(|o| o.parent == parent && o.name == name)
            .map(|o| o.bytes.clone())
    }

    pub fn containers_named(&self, name: &str, parent: Option<&str>) -> usize {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .filter(|c| c.name == name && c.parent.as_deref() == parent)
            .count()
    }

    pub fn find_container(&self, name: &str, parent: Option<&str>) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.name == name && c.parent.as_deref() == parent)
            .map(|c| c.id.clone())
    }

    /// Slash-joined names from the top level down to `id`.
    pub fn container_path(&self, id: &str) -> String {
        let state = self.state.lock().unwrap();
        let mut names = Vec::new();
        let mut current = Some(id.to_string());
        while let Some(id) = current {
            let Some(container) = state.containers.iter().find(|c| c.id == id) else {
                break;
            };
            names.push(container.name.clone());
            current = container.parent.clone();
        }
        names.reverse();
        names.join("/")
    }

    pub fn created_containers(&self) -> usize {
        self.state.lock().unwrap().created_containers
    }

    pub fn uploads(&self) -> usize {
        self.state.lock().unwrap().uploads
    }

    pub fn fail_listings(&self) {
        self.state.lock().unwrap().fail_listings = true;
    }

    pub fn fail_private_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_private_writes = fail;
    }

    /// The next `count` uploads store one extra byte.
    pub fn corrupt_next_uploads(&self, count: usize) {
        self.state.lock().unwrap().corrupt_uploads = count;
    }

    /// After reading an upload, replaces the local file with a directory so
    /// that removing it afterwards fails.
    pub fn occupy_uploaded_paths(&self) {
        self.state.lock().unwrap().occupy_uploaded_paths = true;
    }

    /// Terminal status reported by the next upload instead of `Completed`.
    pub fn push_upload_status(&self, status: UploadStatus) {
        self.state.lock().unwrap().statuses.push_back(status);
    }

    pub fn put_private(&self, name: &str, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .private
            .insert(name.to_string(), bytes.to_vec());
    }

    pub fn private(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().private.get(name).cloned()
    }

    fn store(&self, id: Option<&str>, name: &str, parent: &str, mut bytes: Vec<u8>) -> UploadStatus {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.statuses.pop_front() {
            return status;
        }
        if state.corrupt_uploads > 0 {
            state.corrupt_uploads -= 1;
            bytes.push(0xff);
        }
        state.uploads += 1;
        let existing = id.and_then(|id| state.objects.iter().position(|o| o.id == id));
        match existing {
            Some(index) => state.objects[index].bytes = bytes,
            None => {
                let id = state.next_id("o");
                state.objects.push(MemoryObject {
                    id,
                    name: name.to_string(),
                    parent: parent.to_string(),
                    bytes,
                });
            }
        }
        UploadStatus::Completed
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn list_containers(&self, parent: Option<&str>) -> Result<Vec<Container>, SinkError> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        if state.fail_listings {
            return Err(unavailable("listing refused"));
        }
        Ok(state
            .containers
            .iter()
            .filter(|c| c.parent.as_deref() == parent)
            .map(|c| Container {
                id: c.id.clone(),
                name: c.name.clone(),
            })
            .collect())
    }

    async fn create_container(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Container, SinkError> {
        tokio::task::yield_now().await;
        let id = self.add_container(name, parent);
        self.state.lock().unwrap().created_containers += 1;
        Ok(Container {
            id,
            name: name.to_string(),
        })
    }

    async fn find_object(
        &self,
        name: &str,
        parent: &str,
    ) -> Result<Option<StoredObject>, SinkError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .find(|o| o.parent == parent && o.name == name)
            .map(|o| StoredObject {
                id: o.id.clone(),
                name: o.name.clone(),
                content_hash: Some(sha256_hex(&o.bytes)),
                size: o.bytes.len() as u64,
                web_link: format!("https://disk.test/{}", o.id),
            }))
    }

    async fn create_object(
        &self,
        name: &str,
        parent: &str,
        local: &Path,
        _mime_type: &str,
    ) -> Result<UploadStatus, SinkError> {
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|err| SinkError::Transfer(TransferError::Io(err)))?;
        let occupy = self.state.lock().unwrap().occupy_uploaded_paths;
        if occupy {
            let io = |err| SinkError::Transfer(TransferError::Io(err));
            tokio::fs::remove_file(local).await.map_err(io)?;
            tokio::fs::create_dir(local).await.map_err(io)?;
        }
        Ok(self.store(None, name, parent, bytes))
    }

    async fn update_object(
        &self,
        object: &StoredObject,
        local: &Path,
        _mime_type: &str,
    ) -> Result<UploadStatus, SinkError> {
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|err| SinkError::Transfer(TransferError::Io(err)))?;
        Ok(self.store(Some(&object.id), &object.name, "", bytes))
    }

    async fn read_private(&self, name: &str) -> Result<Option<Vec<u8>>, SinkError> {
        Ok(self.private(name))
    }

    async fn write_private(&self, name: &str, bytes: Vec<u8>) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_private_writes {
            return Err(unavailable("private area is read-only"));
        }
        state.private.insert(name.to_string(), bytes);
        Ok(())
    }
}

/// Notification sink that remembers what it was asked to deliver.
#[derive(Default)]
pub struct RecordingNotifications {
    seen: Mutex<Vec<String>>,
}

impl RecordingNotifications {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifications {
    async fn deliver(&self, text: &str) -> Result<(), NotifyError> {
        self.seen.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
