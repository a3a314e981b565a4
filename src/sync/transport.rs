use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::error::TransportError;
use super::protocol::{
    PullRequest, PullResponse, PushRequest, PushResponse, ResyncRequired, RowPayload,
};
use crate::config::SyncConfig;

/// Connection to a sync server.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// `POST /sync`: submit one chunk of local changes.
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError>;

    /// `POST /sync/rv`: rows changed since each table's cursor.
    async fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportError>;

    /// `GET /records/{table}/{pk}`: one row, or `None` if the server has
    /// never seen it.
    async fn fetch_row(&self, table: &str, pk: &str)
        -> Result<Option<RowPayload>, TransportError>;
}

/// JSON over HTTP with bearer authentication.
pub struct HttpTransport {
    client: reqwest::Client,
    server_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Returns `None` if the server URL or API key is missing.
    pub fn from_config(config: &SyncConfig) -> Option<Self> {
        let server_url = config.server_url.clone()?;
        let api_key = config.api_key.clone()?;
        Some(Self::new(server_url, api_key))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
        let status = response.status();
        if status == StatusCode::GONE {
            let body: ResyncRequired = response
                .json()
                .await
                .map_err(|e| TransportError::Decode(e.to_string()))?;
            return Err(TransportError::ResyncRequired {
                current_position: body.current_position,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError> {
        let response = self
            .client
            .post(self.url("/sync"))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportError> {
        let response = self
            .client
            .post(self.url("/sync/rv"))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn fetch_row(
        &self,
        table: &str,
        pk: &str,
    ) -> Result<Option<RowPayload>, TransportError> {
        let response = self
            .client
            .get(self.url(&format!("/records/{}/{}", table, pk)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read(response).await.map(Some)
    }
}
