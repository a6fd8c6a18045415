//! `ContentStore`: upload, download, pin and liveness over a backend plus
//! a prioritised list of retrieval strategies.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use mp_proto::ContentRef;
use mp_resilience::{with_retry, with_timeout, RetryConfig};

use crate::backend::ContentBackend;
use crate::error::ContentError;
use crate::retrieval::{BackendRetrieval, RetrievalStrategy};

#[derive(Debug, Clone)]
pub struct ContentStoreConfig {
    /// Upper bound for a single strategy's fetch.
    pub strategy_timeout: Duration,
    /// Upper bound for `availability_check`.
    pub probe_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            strategy_timeout: Duration::from_secs(20),
            probe_timeout: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinStatus {
    Pinned,
    /// Content is retrievable now, but durability is not guaranteed.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub reference: ContentRef,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub pin: PinStatus,
}

impl UploadReceipt {
    pub fn is_durable(&self) -> bool {
        self.pin == PinStatus::Pinned
    }
}

pub struct ContentStore {
    backend: Arc<dyn ContentBackend>,
    strategies: Vec<Arc<dyn RetrievalStrategy>>,
    config: ContentStoreConfig,
}

impl ContentStore {
    /// The backend itself is always the first retrieval strategy.
    pub fn new(backend: Arc<dyn ContentBackend>, config: ContentStoreConfig) -> Self {
        let primary: Arc<dyn RetrievalStrategy> = Arc::new(BackendRetrieval::new(backend.clone()));
        Self { backend, strategies: vec![primary], config }
    }

    /// Append a fallback strategy (lower priority than those already added).
    pub fn with_strategy(mut self, strategy: Arc<dyn RetrievalStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn upload(&self, bytes: Vec<u8>) -> Result<UploadReceipt, ContentError> {
        let added = with_retry(&self.config.retry, "content.add", |_| {
            self.backend.add(bytes.clone(), true)
        })
        .await?;

        let pin = if added.pinned {
            PinStatus::Pinned
        } else {
            match self.backend.pin(&added.reference).await {
                Ok(()) => PinStatus::Pinned,
                Err(e) => {
                    warn!(cid = %added.reference, error = %e, "content uploaded but not pinned");
                    PinStatus::Failed(e.to_string())
                }
            }
        };

        info!(cid = %added.reference, size = added.size, durable = pin == PinStatus::Pinned, "content uploaded");
        Ok(UploadReceipt {
            reference: added.reference,
            size: added.size,
            uploaded_at: Utc::now(),
            pin,
        })
    }

    /// Fetch every byte behind `reference`, validating the length when a
    /// size hint is known.
    pub async fn download(
        &self,
        reference: &ContentRef,
        size_hint: Option<u64>,
    ) -> Result<Vec<u8>, ContentError> {
        with_retry(&self.config.retry, "content.download", |_| {
            self.fetch_once(reference, size_hint)
        })
        .await
    }

    /// One pass over the strategy list, stopping at the first success.
    async fn fetch_once(
        &self,
        reference: &ContentRef,
        size_hint: Option<u64>,
    ) -> Result<Vec<u8>, ContentError> {
        let mut network_failure: Option<String> = None;
        let mut mismatch: Option<ContentError> = None;

        for strategy in &self.strategies {
            let name = strategy.name();
            match with_timeout(self.config.strategy_timeout, strategy.fetch(reference)).await {
                Ok(Ok(bytes)) => match check_size(&bytes, size_hint) {
                    Ok(()) => {
                        debug!(cid = %reference, strategy = name, size = bytes.len(), "content fetched");
                        return Ok(bytes);
                    }
                    Err(e) => {
                        warn!(cid = %reference, strategy = name, error = %e, "discarding fetched content");
                        mismatch = Some(e);
                    }
                },
                Ok(Err(ContentError::NotFound(_))) => {
                    debug!(cid = %reference, strategy = name, "not found");
                }
                Ok(Err(e)) => {
                    warn!(cid = %reference, strategy = name, error = %e, "retrieval strategy failed");
                    network_failure = Some(format!("{name}: {e}"));
                }
                Err(elapsed) => {
                    warn!(cid = %reference, strategy = name, "retrieval strategy timed out");
                    network_failure = Some(format!("{name}: {elapsed}"));
                }
            }
        }

        if let Some(last) = network_failure {
            return Err(ContentError::NetworkUnavailable(format!(
                "{} retrieval strategies exhausted, last failure {last}",
                self.strategies.len()
            )));
        }
        Err(mismatch.unwrap_or_else(|| ContentError::NotFound(reference.to_string())))
    }

    /// Re-pin content, e.g. after a soft pin failure at upload time.
    pub async fn pin(&self, reference: &ContentRef) -> Result<(), ContentError> {
        with_retry(&self.config.retry, "content.pin", |_| self.backend.pin(reference)).await
    }

    /// Fast liveness probe used to gate user-facing sends.
    pub async fn availability_check(&self) -> bool {
        with_timeout(self.config.probe_timeout, self.backend.ping())
            .await
            .unwrap_or(false)
    }
}

fn check_size(bytes: &[u8], size_hint: Option<u64>) -> Result<(), ContentError> {
    match size_hint {
        Some(expected) if expected != bytes.len() as u64 => Err(ContentError::SizeMismatch {
            expected,
            actual: bytes.len() as u64,
        }),
        _ => Ok(()),
    }
}
