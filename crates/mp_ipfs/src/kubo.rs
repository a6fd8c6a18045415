//! IPFS (Kubo) HTTP RPC backend.
//!
//! Every RPC is a `POST /api/v0/<cmd>`. Errors come back as HTTP 500 with a
//! JSON body `{"Message": "...", "Code": 0, "Type": "error"}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use mp_proto::ContentRef;

use crate::backend::{AddedContent, ContentBackend};
use crate::error::ContentError;

#[derive(Clone)]
pub struct KuboBackend {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size")]
    size: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Message")]
    message: String,
}

impl KuboBackend {
    pub fn new(api_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ContentError> {
        let client = reqwest::Client::builder()
            .user_agent("mp-chat/0.1")
            .timeout(request_timeout)
            .build()
            .map_err(|e| ContentError::Protocol(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, cmd: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, cmd)
    }

    /// Turn a non-success response into the matching error class.
    async fn classify_failure(res: Response, uploading: bool) -> ContentError {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        let lowered = message.to_ascii_lowercase();

        if status == StatusCode::NOT_FOUND
            || lowered.contains("not found")
            || lowered.contains("no link named")
        {
            ContentError::NotFound(message)
        } else if status.is_server_error() {
            if uploading {
                ContentError::UploadTransient(format!("{status}: {message}"))
            } else {
                ContentError::NetworkUnavailable(format!("{status}: {message}"))
            }
        } else {
            ContentError::Protocol(format!("{status}: {message}"))
        }
    }
}

#[async_trait]
impl ContentBackend for KuboBackend {
    async fn add(&self, bytes: Vec<u8>, pin: bool) -> Result<AddedContent, ContentError> {
        let len = bytes.len();
        let form = Form::new().part("file", Part::bytes(bytes).file_name("envelope"));
        let res = self
            .client
            .post(self.url("add"))
            .query(&[("pin", if pin { "true" } else { "false" }), ("cid-version", "1")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| ContentError::from_reqwest(e, true))?;

        if !res.status().is_success() {
            return Err(Self::classify_failure(res, true).await);
        }
        let added: AddResponse = res
            .json()
            .await
            .map_err(|e| ContentError::Protocol(format!("add response: {e}")))?;
        let size = added.size.parse::<u64>().unwrap_or(len as u64);
        debug!(cid = %added.hash, size, "kubo add");
        Ok(AddedContent { reference: ContentRef::new(added.hash)?, size, pinned: pin })
    }

    async fn cat(&self, reference: &ContentRef) -> Result<Vec<u8>, ContentError> {
        let mut res = self
            .client
            .post(self.url("cat"))
            .query(&[("arg", reference.as_str())])
            .send()
            .await
            .map_err(|e| ContentError::from_reqwest(e, false))?;

        if !res.status().is_success() {
            return Err(Self::classify_failure(res, false).await);
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

    async fn pin(&self, reference: &ContentRef) -> Result<(), ContentError> {
        let res = self
            .client
            .post(self.url("pin/add"))
            .query(&[("arg", reference.as_str())])
            .send()
            .await
            .map_err(|e| ContentError::PinFailed(e.to_string()))?;
        if res.status().is_success() {
            return Ok(());
        }
        match Self::classify_failure(res, false).await {
            ContentError::NotFound(m) => Err(ContentError::NotFound(m)),
            other => Err(ContentError::PinFailed(other.to_string())),
        }
    }

    async fn ping(&self) -> bool {
        match self.client.post(self.url("version")).send().await {
            Ok(res) => res.status().is_success(),
            Err(_) => false,
        }
    }
}
