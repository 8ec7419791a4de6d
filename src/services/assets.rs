//! Binary assets — storage, resolution, download, and `data:` URL encoding.
//!
//! DESIGN
//! ======
//! Image elements point at a `FileId`. The scene blob carries the bytes
//! inline as a `data:` URL under `files`, which is what lets a peer render
//! an image it has never seen. When a snapshot references an asset without
//! carrying its bytes, the session materializes it: `AssetStore::resolve`
//! turns the id into a URL and `AssetFetcher::fetch` downloads it.
//!
//! ERROR HANDLING
//! ==============
//! Every failure here maps to `E_ASSET_UNAVAILABLE`. Callers skip the one
//! element that needed the asset and carry on with the rest of the scene.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::CONTENT_TYPE;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::scene::{BinaryFile, FileId};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
const MEMORY_URL_PREFIX: &str = "mem://assets/";

// =============================================================================
// TYPES
// =============================================================================

/// Downloaded asset bytes and their media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(FileId),
    #[error("asset request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("asset fetch returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("malformed data url")]
    InvalidDataUrl,
    #[error("unsupported asset url: {0}")]
    UnsupportedUrl(String),
}

impl ErrorCode for AssetError {
    fn error_code(&self) -> &'static str {
        "E_ASSET_UNAVAILABLE"
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::NotFound(_) | Self::InvalidDataUrl | Self::UnsupportedUrl(_) => false,
        }
    }
}

// =============================================================================
// CONTRACTS
// =============================================================================

/// External binary-asset collaborator.
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    /// Persist bytes and return their reference.
    async fn store(&self, bytes: Vec<u8>, mime_type: &str) -> Result<FileId, AssetError>;

    /// URL the bytes behind `file_id` can be downloaded from.
    async fn resolve(&self, file_id: &str) -> Result<String, AssetError>;
}

/// Downloads asset bytes from a URL.
#[async_trait::async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetError>;
}

/// Resolve and download `file_id`, returning it in inline scene form.
///
/// # Errors
///
/// Returns the resolve or fetch failure unchanged.
pub async fn materialize(
    file_id: &str,
    assets: &dyn AssetStore,
    fetcher: &dyn AssetFetcher,
) -> Result<BinaryFile, AssetError> {
    let url = assets.resolve(file_id).await?;
    let fetched = fetcher.fetch(&url).await?;
    Ok(to_binary_file(&fetched))
}

// =============================================================================
// DATA URLS
// =============================================================================

/// Encode fetched bytes as an inline scene file.
#[must_use]
pub fn to_binary_file(asset: &FetchedAsset) -> BinaryFile {
    BinaryFile {
        data_url: format!("data:{};base64,{}", asset.mime_type, STANDARD.encode(&asset.bytes)).into(),
        mime_type: Some(asset.mime_type.clone()),
    }
}

/// Decode a `data:` URL (base64 or plain payload).
///
/// # Errors
///
/// Returns `InvalidDataUrl` when the prefix, separator or base64 payload is bad.
pub fn decode_data_url(url: &str) -> Result<FetchedAsset, AssetError> {
    let rest = url.strip_prefix("data:").ok_or(AssetError::InvalidDataUrl)?;
    let (meta, payload) = rest.split_once(',').ok_or(AssetError::InvalidDataUrl)?;

    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };
    let mime_type = if mime.is_empty() { DEFAULT_MIME_TYPE } else { mime };

    let bytes = if is_base64 {
        STANDARD
            .decode(payload)
            .map_err(|_| AssetError::InvalidDataUrl)?
    } else {
        payload.as_bytes().to_vec()
    };

    Ok(FetchedAsset { bytes, mime_type: mime_type.to_string() })
}

// =============================================================================
// HTTP FETCHER
// =============================================================================

/// Downloads assets over HTTP(S). `data:` URLs are decoded without a request.
pub struct HttpAssetFetcher {
    http: reqwest::Client,
}

impl HttpAssetFetcher {
    /// Build a fetcher whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self, AssetError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetError> {
        if url.starts_with("data:") {
            return decode_data_url(url);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AssetError::UnsupportedUrl(url.to_string()));
        }

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Status { status: status.as_u16(), url: url.to_string() });
        }

        let mime_type = match response.headers().get(CONTENT_TYPE).map(|v| v.to_str()) {
            Some(Ok(value)) => value.to_string(),
            _ => DEFAULT_MIME_TYPE.to_string(),
        };
        let bytes = response.bytes().await?.to_vec();

        Ok(FetchedAsset { bytes, mime_type })
    }
}

// =============================================================================
// IN-MEMORY ASSETS
// =============================================================================

/// In-process asset store that can also serve its own URLs.
#[derive(Clone, Default)]
pub struct MemoryAssets {
    inner: Arc<Mutex<HashMap<FileId, FetchedAsset>>>,
}

impl MemoryAssets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, file_id: &str) -> Option<FetchedAsset> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.get(file_id).cloned()
    }
}

#[async_trait::async_trait]
impl AssetStore for MemoryAssets {
    async fn store(&self, bytes: Vec<u8>, mime_type: &str) -> Result<FileId, AssetError> {
        let file_id = format!("asset-{}", Uuid::new_v4());
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.insert(file_id.clone(), FetchedAsset { bytes, mime_type: mime_type.to_string() });
        Ok(file_id)
    }

    async fn resolve(&self, file_id: &str) -> Result<String, AssetError> {
        if self.get(file_id).is_some() {
            Ok(format!("{MEMORY_URL_PREFIX}{file_id}"))
        } else {
            Err(AssetError::NotFound(file_id.to_string()))
        }
    }
}

#[async_trait::async_trait]
impl AssetFetcher for MemoryAssets {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetError> {
        if url.starts_with("data:") {
            return decode_data_url(url);
        }
        let file_id = url
            .strip_prefix(MEMORY_URL_PREFIX)
            .ok_or_else(|| AssetError::UnsupportedUrl(url.to_string()))?;
        self.get(file_id)
            .ok_or_else(|| AssetError::NotFound(file_id.to_string()))
    }
}

#[cfg(test)]
#[path = "assets_test.rs"]
mod tests;
