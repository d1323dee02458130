use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://cloud-api.yandex.net";
const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("api response missing embedded items")]
    MissingEmbedded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    NotFound,
    AlreadyExists,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct DiskClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DiskClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DiskError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DiskError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn get_disk_info(&self) -> Result<DiskInfo, DiskError> {
        let url = self.endpoint("/v1/disk")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn get_resource(&self, path: &str) -> Result<Resource, DiskError> {
        let mut url = self.endpoint("/v1/disk/resources")?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("limit", "0");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Like [`get_resource`](Self::get_resource), but a missing resource is `Ok(None)`.
    pub async fn find_resource(&self, path: &str) -> Result<Option<Resource>, DiskError> {
        match self.get_resource(path).await {
            Ok(resource) => Ok(Some(resource)),
            Err(err) if err.classification() == Some(ApiErrorClass::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn create_folder(&self, path: &str) -> Result<Link, DiskError> {
        let mut url = self.endpoint("/v1/disk/resources")?;
        url.query_pairs_mut().append_pair("path", path);
        let response = self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_directory(
        &self,
        path: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<ResourceList, DiskError> {
        let mut url = self.endpoint("/v1/disk/resources")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("path", path);
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
            if let Some(offset) = offset {
                query.append_pair("offset", &offset.to_string());
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let payload: ResourceListResponse = Self::handle_response(response).await?;
        payload.embedded.ok_or(DiskError::MissingEmbedded)
    }

    /// Walks every page of a directory listing.
    pub async fn list_directory_all(&self, path: &str) -> Result<Vec<Resource>, DiskError> {
        let mut offset = 0u32;
        let mut items = Vec::new();
        loop {
            let page = self
                .list_directory(path, Some(DEFAULT_PAGE_SIZE), Some(offset))
                .await?;
            let fetched = page.items.len() as u32;
            offset = offset.saturating_add(fetched);
            let total = page.total;
            items.extend(page.items);
            if fetched == 0 || offset >= total {
                break;
            }
        }
        Ok(items)
    }

    pub async fn get_download_link(&self, path: &str) -> Result<Link, DiskError> {
        let mut url = self.endpoint("/v1/disk/resources/download")?;
        url.query_pairs_mut().append_pair("path", path);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn get_upload_link(&self, path: &str, overwrite: bool) -> Result<Link, DiskError> {
        let mut url = self.endpoint("/v1/disk/resources/upload")?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("overwrite", if overwrite { "true" } else { "false" });
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("OAuth {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DiskError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DiskError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DiskError::Api { status, body })
        }
    }
}

impl DiskError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DiskError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DiskError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiErrorClass::Auth,
        StatusCode::NOT_FOUND => ApiErrorClass::NotFound,
        StatusCode::CONFLICT => ApiErrorClass::AlreadyExists,
        StatusCode::TOO_MANY_REQUESTS => ApiErrorClass::RateLimit,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY => ApiErrorClass::Transient,
        status if status.is_server_error() => ApiErrorClass::Transient,
        _ => ApiErrorClass::Permanent,
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DiskInfo {
    pub total_space: u64,
    pub used_space: u64,
    #[serde(default)]
    pub trash_size: u64,
    #[serde(default)]
    pub is_paid: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Resource {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    File,
    Dir,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ResourceList {
    pub items: Vec<Resource>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Deserialize, Serialize)]
struct ResourceListResponse {
    #[serde(rename = "_embedded")]
    embedded: Option<ResourceList>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Link {
    pub href: Url,
    pub method: String,
    #[serde(default)]
    pub templated: bool,
}
