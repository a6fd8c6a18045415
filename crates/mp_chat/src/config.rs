//! Runtime configuration.
//!
//! Defaults suit a local node; `from_env` overlays `MP_*` variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mp_ipfs::ContentStoreConfig;
use mp_ledger::LedgerAdapterConfig;
use mp_proto::PaddingMode;
use mp_resilience::RetryConfig;
use mp_store::{CacheConfig, DraftConfig};
use mp_timeline::TimelineConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub ipfs: IpfsConfig,
    pub ledger: LedgerConfig,
    pub store: StoreConfig,
    pub timeline: TimelineConfig,
    pub logging: LoggingConfig,
    pub padding: PaddingMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpfsConfig {
    pub api_url: String,
    /// Fallback gateways, highest priority first.
    pub gateways: Vec<String>,
    pub request_timeout: Duration,
    pub strategy_timeout: Duration,
    pub probe_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for IpfsConfig {
    fn default() -> Self {
        let store = ContentStoreConfig::default();
        Self {
            api_url: "http://127.0.0.1:5001".into(),
            gateways: vec!["https://ipfs.io".into()],
            request_timeout: Duration::from_secs(30),
            strategy_timeout: store.strategy_timeout,
            probe_timeout: store.probe_timeout,
            retry: store.retry,
        }
    }
}

impl IpfsConfig {
    pub fn content_store_config(&self) -> ContentStoreConfig {
        ContentStoreConfig {
            strategy_timeout: self.strategy_timeout,
            probe_timeout: self.probe_timeout,
            retry: self.retry.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub request_timeout: Duration,
    #[serde(flatten)]
    pub adapter: LedgerAdapterConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:9933".into(),
            request_timeout: Duration::from_secs(15),
            adapter: LedgerAdapterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    #[serde(flatten)]
    pub drafts: DraftConfig,
    pub sweep_interval: Duration,
    /// Decrypted message cache, off unless enabled.
    pub cache: CacheConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("memopark-chat.db"),
            drafts: DraftConfig::default(),
            sweep_interval: Duration::from_secs(10 * 60),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "mp_chat=info,mp_ledger=info,mp_ipfs=info,mp_store=info".into(),
            json: false,
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for the `MP_*` keys.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("MP_IPFS_API_URL") {
            config.ipfs.api_url = url;
        }
        if let Some(list) = lookup("MP_IPFS_GATEWAYS") {
            config.ipfs.gateways = list
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(url) = lookup("MP_LEDGER_RPC_URL") {
            config.ledger.rpc_url = url;
        }
        if let Some(path) = lookup("MP_DB_PATH") {
            config.store.db_path = PathBuf::from(path);
        }
        if let Some(flag) = lookup("MP_LOG_JSON") {
            config.logging.json = is_truthy(&flag);
        }
        if let Some(flag) = lookup("MP_MESSAGE_CACHE") {
            config.store.cache.enabled = is_truthy(&flag);
        }
        config
    }
}

fn is_truthy(flag: &str) -> bool {
    matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
