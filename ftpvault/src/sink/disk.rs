use std::path::Path;

use async_trait::async_trait;
use disk_core::{ApiErrorClass, DiskClient, Resource, ResourceType};
use url::Url;

use super::{Container, Sink, SinkError, StoredObject, TransferClient, UploadStatus};

const DISK_ROOT: &str = "disk:/";
const APP_ROOT: &str = "app:/";
pub const DEFAULT_WEB_BASE: &str = "https://disk.yandex.ru";

/// [`Sink`] over the cloud disk REST API. Container and object ids are disk
/// paths such as `disk:/Archive/2024/05`.
pub struct DiskSink {
    client: DiskClient,
    transfer: TransferClient,
    web_base: Url,
}

impl DiskSink {
    pub fn new(
        client: DiskClient,
        transfer: TransferClient,
        web_base: &str,
    ) -> Result<Self, SinkError> {
        let web_base =
            Url::parse(web_base).map_err(|err| SinkError::InvalidPath(err.to_string()))?;
        Ok(Self {
            client,
            transfer,
            web_base,
        })
    }

    fn web_link(&self, path: &str) -> Result<String, SinkError> {
        let relative = path.strip_prefix(DISK_ROOT).unwrap_or(path);
        let mut url = self.web_base.clone();
        url.path_segments_mut()
            .map_err(|_| SinkError::InvalidPath(self.web_base.to_string()))?
            .pop_if_empty()
            .extend(["client", "disk"])
            .extend(relative.split('/').filter(|part| !part.is_empty()));
        Ok(url.to_string())
    }

    fn stored_object(&self, resource: Resource) -> Result<StoredObject, SinkError> {
        let web_link = self.web_link(&resource.path)?;
        Ok(StoredObject {
            id: resource.path,
            name: resource.name,
            content_hash: resource.sha256,
            size: resource.size.unwrap_or_default(),
            web_link,
        })
    }

    async fn upload_to(
        &self,
        path: &str,
        overwrite: bool,
        local: &Path,
        mime_type: &str,
    ) -> Result<UploadStatus, SinkError> {
        let link = self.client.get_upload_link(path, overwrite).await?;
        Ok(self
            .transfer
            .upload_from_path(link.href.as_str(), local, mime_type)
            .await?)
    }
}

#[async_trait]
impl Sink for DiskSink {
    async fn list_containers(&self, parent: Option<&str>) -> Result<Vec<Container>, SinkError> {
        let parent = parent.unwrap_or(DISK_ROOT);
        let items = self.client.list_directory_all(parent).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.resource_type == ResourceType::Dir)
            .map(|item| Container {
                id: item.path,
                name: item.name,
            })
            .collect())
    }

    async fn create_container(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Container, SinkError> {
        let path = child_path(parent.unwrap_or(DISK_ROOT), name)?;
        match self.client.create_folder(&path).await {
            Ok(_) => {}
            // Created by someone else between our listing and this call.
            Err(err) if err.classification() == Some(ApiErrorClass::AlreadyExists) => {
                tracing::debug!(path = %path, "folder already exists");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(Container {
            id: path,
            name: name.to_string(),
        })
    }

    async fn find_object(
        &self,
        name: &str,
        parent: &str,
    ) -> Result<Option<StoredObject>, SinkError> {
        let path = child_path(parent, name)?;
        match self.client.find_resource(&path).await? {
            Some(resource) if resource.resource_type == ResourceType::File => {
                Ok(Some(self.stored_object(resource)?))
            }
            _ => Ok(None),
        }
    }

    async fn create_object(
        &self,
        name: &str,
        parent: &str,
        local: &Path,
        mime_type: &str,
    ) -> Result<UploadStatus, SinkError> {
        let path = child_path(parent, name)?;
        self.upload_to(&path, false, local, mime_type).await
    }

    async fn update_object(
        &self,
        object: &StoredObject,
        local: &Path,
        mime_type: &str,
    ) -> Result<UploadStatus, SinkError> {
        self.upload_to(&object.id, true, local, mime_type).await
    }

    async fn read_private(&self, name: &str) -> Result<Option<Vec<u8>>, SinkError> {
        let path = child_path(APP_ROOT, name)?;
        if self.client.find_resource(&path).await?.is_none() {
            return Ok(None);
        }
        let link = self.client.get_download_link(&path).await?;
        Ok(Some(self.transfer.download_bytes(link.href.as_str()).await?))
    }

    async fn write_private(&self, name: &str, bytes: Vec<u8>) -> Result<(), SinkError> {
        let path = child_path(APP_ROOT, name)?;
        let link = self.client.get_upload_link(&path, true).await?;
        match self
            .transfer
            .upload_bytes(link.href.as_str(), bytes, "application/json")
            .await?
        {
            UploadStatus::Completed => Ok(()),
            other => Err(SinkError::Incomplete(other)),
        }
    }
}

fn child_path(parent: &str, name: &str) -> Result<String, SinkError> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(SinkError::InvalidPath(name.to_string()));
    }
    if parent.ends_with('/') {
        Ok(format!("{parent}{name}"))
    } else {
        Ok(format!("{parent}/{name}"))
    }
}
