//! Vault: the at-rest key for the local store.
//!
//! The key is derived from the signed-in account and held in memory only for
//! the authenticated session. Signing out locks the vault and zeroizes the
//! key; every encrypted read or write after that fails with `VaultLocked`.

use std::sync::Arc;

use tokio::sync::RwLock;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use mp_crypto::AccountKeyPair;

use crate::error::StoreError;

#[derive(ZeroizeOnDrop)]
struct VaultInner {
    key: [u8; 32],
}

/// Thread-safe vault handle. Clones share the same key slot.
#[derive(Clone, Default)]
pub struct Vault {
    inner: Arc<RwLock<Option<VaultInner>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unlock with the storage key of `account`.
    pub async fn unlock_for(&self, account: &AccountKeyPair) -> Result<(), StoreError> {
        let key = account.storage_key()?;
        self.unlock_with_key(key).await;
        Ok(())
    }

    pub async fn unlock_with_key(&self, key: Zeroizing<[u8; 32]>) {
        let mut guard = self.inner.write().await;
        *guard = Some(VaultInner { key: *key });
    }

    pub async fn lock(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }

    pub async fn is_locked(&self) -> bool {
        self.inner.read().await.is_none()
    }

    /// Run `f` with the raw key, or fail with `VaultLocked`.
    pub async fn with_key<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&[u8; 32]) -> Result<R, StoreError>,
    {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some(inner) => f(&inner.key),
            None => Err(StoreError::VaultLocked),
        }
    }
}
