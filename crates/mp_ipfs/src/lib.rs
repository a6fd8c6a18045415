//! mp_ipfs: Content-addressed store adapter
//!
//! Ciphertext envelopes are stored in a content-addressed network and fetched
//! back by reference. Nothing here ever sees plaintext.
//!
//! # Modules
//! - `backend`: `ContentBackend` boundary trait
//! - `kubo`: IPFS (Kubo) HTTP RPC backend
//! - `memory`: in-process backend with fault injection, for tests
//! - `retrieval`: prioritised retrieval strategies (node, HTTP gateways)
//! - `store`: `ContentStore`: upload / download / pin / availability
//! - `error`: content-store error taxonomy

pub mod backend;
pub mod error;
pub mod kubo;
pub mod memory;
pub mod retrieval;
pub mod store;

pub use backend::{AddedContent, ContentBackend};
pub use error::ContentError;
pub use kubo::KuboBackend;
pub use memory::MemoryBackend;
pub use retrieval::{BackendRetrieval, GatewayRetrieval, RetrievalStrategy};
pub use store::{ContentStore, ContentStoreConfig, PinStatus, UploadReceipt};
