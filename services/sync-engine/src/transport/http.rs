//! REST client for the poll fallback and staff status transitions
//!
//! - `GET {base}/requests`, `GET {base}/orders` return the full collection,
//!   either bare or wrapped as `{"isSucess": true, "data": [...]}`
//! - `PATCH {base}/requests/{id}`, `PATCH {base}/orders/details/{id}` take
//!   `{"status": "..."}`
//!
//! Elements that fail to decode are dropped one by one. `isSucess: false`
//! fails the fetch so the poller skips the tick instead of wiping the list.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use types::entity::StreamEntity;
use types::ids::EventId;
use types::message::decode_lenient;

use crate::error::SyncError;
use crate::polling::SnapshotFetcher;

/// Default per-request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP {0}")]
    Status(StatusCode),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend reported failure: {0}")]
    Unsuccessful(String),

    #[error("Unexpected response body: {0}")]
    Body(String),
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Status(status)
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
            {
                SyncError::Auth(format!("backend answered HTTP {}", status.as_u16()))
            }
            other => SyncError::Transport(other.to_string()),
        }
    }
}

/// Collection response: wrapped or bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Bare(Vec<Value>),
    Envelope {
        #[serde(rename = "isSucess", alias = "isSuccess", default = "success_by_default")]
        is_success: bool,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        message: Option<String>,
    },
}

fn success_by_default() -> bool {
    true
}

/// Backend REST client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    /// Client with the default request timeout.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, FetchError> {
        Self::with_timeout(base_url, token, DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        // A trailing slash makes `join` append instead of replacing the last segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).map_err(|e| FetchError::InvalidUrl(format!("{base_url}: {e}")))?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::InvalidUrl(format!("{path}: {e}")))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetch the full current collection of `E`'s stream.
    pub async fn fetch_collection<E: StreamEntity>(&self) -> Result<Vec<E>, FetchError> {
        let path = E::KIND.collection_path();
        let url = self.endpoint(path)?;
        let response = self.authorized(self.http.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let items = match response.json::<Listing>().await? {
            Listing::Bare(items) => items,
            Listing::Envelope {
                is_success: false,
                message,
                ..
            } => {
                return Err(FetchError::Unsuccessful(
                    message.unwrap_or_else(|| "isSucess=false".to_string()),
                ))
            }
            Listing::Envelope {
                data: Value::Array(items),
                ..
            } => items,
            Listing::Envelope {
                data: Value::Null, ..
            } => Vec::new(),
            Listing::Envelope { data, .. } => {
                return Err(FetchError::Body(format!("data is not a list: {data}")))
            }
        };

        let (records, rejected) = decode_lenient::<E>(path, items);
        for err in &rejected {
            warn!(stream = %E::KIND, error = %err, "Dropped malformed element from poll");
        }
        debug!(stream = %E::KIND, records = records.len(), dropped = rejected.len(), "Collection fetched");
        Ok(records)
    }

    /// Ask the backend to move one entity to `status`.
    pub async fn update_status<E: StreamEntity>(
        &self,
        id: EventId,
        status: E::Status,
    ) -> Result<(), FetchError> {
        let url = self.endpoint(&E::KIND.status_path(id))?;
        let response = self
            .authorized(self.http.patch(url))
            .json(&json!({ "status": status }))
            .send()
            .await?;
        let code = response.status();
        if !code.is_success() {
            return Err(FetchError::Status(code));
        }
        debug!(stream = %E::KIND, event_id = %id, %status, "Status update accepted");
        Ok(())
    }
}

#[async_trait]
impl<E: StreamEntity> SnapshotFetcher<E> for ApiClient {
    async fn fetch_snapshot(&self) -> Result<Vec<E>, SyncError> {
        self.fetch_collection::<E>().await.map_err(SyncError::from)
    }
}
