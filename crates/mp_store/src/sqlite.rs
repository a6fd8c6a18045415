//! SQLite-backed `LocalStore` via sqlx.
//!
//! Every value is encrypted with the vault key (XChaCha20-Poly1305, the
//! row key as associated data) and stored base64-encoded. Expiry columns
//! stay in plaintext so expired rows can be filtered and swept without
//! the key.

use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use tracing::debug;

use crate::error::StoreError;
use crate::local::LocalStore;
use crate::vault::Vault;

/// Cheap to clone (the pool is reference counted).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    vault: Vault,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run pending migrations.
    ///
    /// WAL mode is set on the connection options; SQLite refuses to change
    /// `journal_mode` inside the transaction sqlx wraps each migration in.
    pub async fn open(db_path: &Path, vault: Vault) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        debug!(path = %db_path.display(), "local store opened");
        Ok(Self { pool, vault })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn encrypt_value(&self, key: &str, plaintext: &str) -> Result<String, StoreError> {
        self.vault
            .with_key(|vault_key| {
                let ct = mp_crypto::aead::encrypt(vault_key, plaintext.as_bytes(), key.as_bytes())?;
                Ok(URL_SAFE_NO_PAD.encode(ct))
            })
            .await
    }

    async fn decrypt_value(&self, key: &str, b64: &str) -> Result<String, StoreError> {
        let ct = URL_SAFE_NO_PAD.decode(b64).map_err(|e| {
            StoreError::Crypto(mp_crypto::CryptoError::MalformedEnvelope(e.to_string()))
        })?;
        self.vault
            .with_key(|vault_key| {
                let pt = mp_crypto::aead::decrypt(vault_key, &ct, key.as_bytes())?;
                String::from_utf8(pt.to_vec()).map_err(|e| {
                    StoreError::Crypto(mp_crypto::CryptoError::MalformedEnvelope(e.to_string()))
                })
            })
            .await
    }

    async fn upsert(
        &self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let enc = self.encrypt_value(key, value).await?;
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at, expires_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at,
                 expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(enc)
        .bind(Utc::now().timestamp_millis())
        .bind(expires_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<String> = sqlx::query_scalar(
            "SELECT value FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(enc) => Ok(Some(self.decrypt_value(key, &enc).await?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.upsert(key, value, None).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.upsert(key, value, Some(expires_at)).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn expire(&self, key: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let done = sqlx::query(
            "UPDATE kv SET expires_at = ? WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(at.timestamp_millis())
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // substr instead of LIKE so '%' and '_' in a prefix match literally.
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT key FROM kv
             WHERE substr(key, 1, length(?)) = ?
               AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .bind(Utc::now().timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let done = sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() as usize)
    }
}
