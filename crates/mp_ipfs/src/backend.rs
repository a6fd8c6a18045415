use async_trait::async_trait;

use mp_proto::ContentRef;

use crate::error::ContentError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedContent {
    pub reference: ContentRef,
    pub size: u64,
    /// Whether the node pinned the content as part of the add.
    pub pinned: bool,
}

/// The external content-addressed store, seen at its boundary.
#[async_trait]
pub trait ContentBackend: Send + Sync {
    async fn add(&self, bytes: Vec<u8>, pin: bool) -> Result<AddedContent, ContentError>;

    async fn cat(&self, reference: &ContentRef) -> Result<Vec<u8>, ContentError>;

    async fn pin(&self, reference: &ContentRef) -> Result<(), ContentError>;

    /// Liveness; never errors.
    async fn ping(&self) -> bool;
}
