// Trust base - Root-of-trust material and its TTL cache
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;

/// Root-of-trust material used to verify aggregator signatures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustBase {
    pub network_id: u32,
    pub epoch: u64,
    #[serde(default)]
    pub root_nodes: Vec<RootNode>,
    #[serde(default)]
    pub quorum_threshold: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootNode {
    pub node_id: String,
    pub sig_key: String,
    #[serde(default)]
    pub stake: u64,
}

/// Where trust-base material comes from
#[async_trait]
pub trait TrustBaseProvider: Send + Sync {
    /// `None` when no trust base can be obtained right now
    async fn fetch_trust_base(&self) -> Option<TrustBase>;
}

/// Provider that always returns the same value
pub struct StaticTrustBaseProvider {
    trust_base: Option<TrustBase>,
}

impl StaticTrustBaseProvider {
    pub fn new(trust_base: Option<TrustBase>) -> Self {
        Self { trust_base }
    }
}

#[async_trait]
impl TrustBaseProvider for StaticTrustBaseProvider {
    async fn fetch_trust_base(&self) -> Option<TrustBase> {
        self.trust_base.clone()
    }
}

/// Provider reading a JSON trust-base file
pub struct FileTrustBaseProvider {
    path: PathBuf,
}

impl FileTrustBaseProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TrustBaseProvider for FileTrustBaseProvider {
    async fn fetch_trust_base(&self) -> Option<TrustBase> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Trust base {} unreadable: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(trust_base) => Some(trust_base),
            Err(e) => {
                warn!("Trust base {} invalid: {}", self.path.display(), e);
                None
            }
        }
    }
}

struct CachedTrustBase {
    trust_base: Arc<TrustBase>,
    fetched_at_ms: u64,
}

/// Trust base cached for a fixed TTL
///
/// Entries are only invalidated by expiry. Concurrent callers share one
/// in-flight fetch.
pub struct TrustBaseCache {
    provider: Option<Arc<dyn TrustBaseProvider>>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
    cached: Mutex<Option<CachedTrustBase>>,
}

impl TrustBaseCache {
    pub fn new(
        provider: Option<Arc<dyn TrustBaseProvider>>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            provider,
            clock,
            ttl_ms: ttl.as_millis() as u64,
            cached: Mutex::new(None),
        }
    }

    /// Cached trust base, refetched once the TTL has elapsed
    pub async fn get(&self) -> Option<Arc<TrustBase>> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now_ms();

        if let Some(entry) = cached.as_ref() {
            if now.saturating_sub(entry.fetched_at_ms) < self.ttl_ms {
                return Some(entry.trust_base.clone());
            }
            debug!("Trust base cache expired");
        }

        let provider = self.provider.as_ref()?;
        match provider.fetch_trust_base().await {
            Some(trust_base) => {
                info!(
                    "🔐 Trust base loaded (network {}, epoch {})",
                    trust_base.network_id, trust_base.epoch
                );
                let trust_base = Arc::new(trust_base);
                *cached = Some(CachedTrustBase {
                    trust_base: trust_base.clone(),
                    fetched_at_ms: now,
                });
                Some(trust_base)
            }
            None => {
                *cached = None;
                None
            }
        }
    }
}
