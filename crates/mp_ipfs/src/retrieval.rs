//! Retrieval strategies, tried in priority order by `ContentStore`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use mp_proto::ContentRef;

use crate::backend::ContentBackend;
use crate::error::ContentError;

#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, reference: &ContentRef) -> Result<Vec<u8>, ContentError>;
}

/// Fetch through the primary node's RPC.
pub struct BackendRetrieval {
    backend: Arc<dyn ContentBackend>,
}

impl BackendRetrieval {
    pub fn new(backend: Arc<dyn ContentBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl RetrievalStrategy for BackendRetrieval {
    fn name(&self) -> &str {
        "node"
    }

    async fn fetch(&self, reference: &ContentRef) -> Result<Vec<u8>, ContentError> {
        self.backend.cat(reference).await
    }
}

/// Fetch from a public HTTP gateway: `GET {base}/ipfs/{reference}`.
pub struct GatewayRetrieval {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayRetrieval {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ContentError> {
        let client = reqwest::Client::builder()
            .user_agent("mp-chat/0.1")
            .timeout(request_timeout)
            .build()
            .map_err(|e| ContentError::Protocol(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RetrievalStrategy for GatewayRetrieval {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn fetch(&self, reference: &ContentRef) -> Result<Vec<u8>, ContentError> {
        let url = format!("{}/ipfs/{}", self.base_url, reference);
        let mut res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ContentError::from_reqwest(e, false))?;

        match res.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(ContentError::NotFound(reference.to_string()))
            }
            s => {
                return Err(ContentError::NetworkUnavailable(format!(
                    "gateway {} answered {s}",
                    self.base_url
                )))
            }
        }

        let mut out = Vec::new();
        while let Some(chunk) = res
            .chunk()
            .await
            .map_err(|e| ContentError::from_reqwest(e, false))?
        {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}
