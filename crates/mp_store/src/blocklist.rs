//! Accounts this device refuses to talk to.
//!
//! Purely local: one `blocked:<account>` key per blocked account. The
//! messenger drops inbound records from them and refuses to send to them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use mp_crypto::AccountId;

use crate::error::StoreError;
use crate::local::{LocalStore, BLOCKED_PREFIX};

fn blocked_key(account: &AccountId) -> String {
    format!("{BLOCKED_PREFIX}{account}")
}

#[derive(Clone)]
pub struct BlockList {
    store: Arc<dyn LocalStore>,
    me: AccountId,
}

impl BlockList {
    pub fn new(store: Arc<dyn LocalStore>, me: AccountId) -> Self {
        Self { store, me }
    }

    pub async fn block(&self, account: &AccountId) -> Result<(), StoreError> {
        if *account == self.me {
            return Err(StoreError::CannotBlockSelf);
        }
        let value = serde_json::to_string(&Utc::now())?;
        self.store.set(&blocked_key(account), &value).await?;
        info!(account = %account.short(), "account blocked");
        Ok(())
    }

    /// Returns whether the account was blocked.
    pub async fn unblock(&self, account: &AccountId) -> Result<bool, StoreError> {
        let removed = self.store.remove(&blocked_key(account)).await?;
        if removed {
            info!(account = %account.short(), "account unblocked");
        }
        Ok(removed)
    }

    pub async fn is_blocked(&self, account: &AccountId) -> Result<bool, StoreError> {
        Ok(self.store.get(&blocked_key(account)).await?.is_some())
    }

    /// Blocked accounts with the time they were blocked.
    pub async fn list(&self) -> Result<Vec<(AccountId, Option<DateTime<Utc>>)>, StoreError> {
        let mut out = Vec::new();
        for key in self.store.keys_with_prefix(BLOCKED_PREFIX).await? {
            let Some(account) = key.strip_prefix(BLOCKED_PREFIX).and_then(|s| s.parse().ok())
            else {
                continue;
            };
            let since = self
                .store
                .get(&key)
                .await?
                .and_then(|raw| serde_json::from_str(&raw).ok());
            out.push((account, since));
        }
        Ok(out)
    }
}
