//! Request/response client for the import backend
//!
//! Four endpoints: request import, status poll, full document, metadata.
//! Failures come back as [`FetchError`], which is cheap to clone so the cache
//! can hand one failure to every caller coalesced onto the same fetch.

use crate::config::SyncConfig;
use async_trait::async_trait;
use folio_common::{DocumentKey, PaperMetadata, RemoteDocument, RemoteStatus};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A failed request/response call
#[derive(Debug, Clone, thiserror::Error)]
pub struct FetchError {
    /// HTTP status when the server answered at all
    pub status: Option<u16>,
    pub detail: String,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "remote fetch failed (HTTP {code}): {}", self.detail),
            None => write!(f, "remote fetch failed: {}", self.detail),
        }
    }
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

/// Response to an import request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReceipt {
    #[serde(default)]
    pub metadata: Option<PaperMetadata>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub message: String,
}

/// Point-in-time status snapshot from the poll endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub loading_status: Option<RemoteStatus>,

    #[serde(default)]
    pub updated_timestamp: Option<String>,

    #[serde(default)]
    pub loading_error: Option<String>,
}

/// The backend's request/response surface
#[async_trait]
pub trait PaperApi: Send + Sync + 'static {
    /// Fire an import for the given archive id. The backend validates the id,
    /// fetches metadata, and starts the pipeline in the background.
    async fn request_import(&self, arxiv_id: &str) -> Result<ImportReceipt, FetchError>;

    async fn fetch_status(&self, key: &DocumentKey) -> Result<StatusSnapshot, FetchError>;

    async fn fetch_document(&self, key: &DocumentKey) -> Result<RemoteDocument, FetchError>;

    async fn fetch_metadata(&self, paper_id: &str) -> Result<PaperMetadata, FetchError>;
}

/// HTTP implementation over the backend's REST endpoints
pub struct HttpPaperApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPaperApi {
    pub fn new(config: &SyncConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| crate::SyncError::Transport {
                detail: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = format!("{}/{path}", self.base_url);
        tracing::debug!("GET {url}");
        let response = self.client.get(&url).send().await.map_err(from_reqwest)?;
        into_json(response).await
    }
}

fn from_reqwest(e: reqwest::Error) -> FetchError {
    FetchError {
        status: e.status().map(|s| s.as_u16()),
        detail: e.to_string(),
    }
}

async fn into_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(FetchError {
            status: Some(status.as_u16()),
            detail,
        });
    }
    response.json().await.map_err(from_reqwest)
}

#[async_trait]
impl PaperApi for HttpPaperApi {
    async fn request_import(&self, arxiv_id: &str) -> Result<ImportReceipt, FetchError> {
        let url = format!("{}/papers/import", self.base_url);
        tracing::info!("Requesting import of {arxiv_id}");
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "arxiv_id": arxiv_id }))
            .send()
            .await
            .map_err(from_reqwest)?;
        into_json(response).await
    }

    async fn fetch_status(&self, key: &DocumentKey) -> Result<StatusSnapshot, FetchError> {
        self.get_json(&format!("papers/status/{}/{}", key.paper_id, key.version))
            .await
    }

    async fn fetch_document(&self, key: &DocumentKey) -> Result<RemoteDocument, FetchError> {
        self.get_json(&format!("papers/document/{}/{}", key.paper_id, key.version))
            .await
    }

    async fn fetch_metadata(&self, paper_id: &str) -> Result<PaperMetadata, FetchError> {
        self.get_json(&format!("metadata/{paper_id}")).await
    }
}
