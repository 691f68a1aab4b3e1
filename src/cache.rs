use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use tracing::{debug, error, warn};

use crate::db::Database;
use crate::error::StageError;

/// Builder for canonical cache keys. Fields render sorted by name, so the
/// same logical request always produces the same key string. Rendered keys
/// also key request coalescing.
#[derive(Debug, Clone)]
pub struct CacheKey {
    endpoint: String,
    fields: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: &str, value: impl std::fmt::Display) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn render(&self) -> String {
        let mut out = self.endpoint.clone();
        for (name, value) in &self.fields {
            out.push('|');
            out.push_str(name);
            out.push('=');
            out.push_str(value);
        }
        out
    }
}

/// The volatile (fast, lossy) cache tier. Implementations may fail or time
/// out; `TieredCache` treats every failure as a miss.
#[async_trait]
pub trait VolatileTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
}

/// Redis-backed volatile tier. The connection manager reconnects on its own;
/// a short connect timeout keeps an unreachable Redis from stalling startup.
pub struct RedisTier {
    manager: ConnectionManager,
}

impl RedisTier {
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(op_timeout);
        let client = Client::open(url)?;
        let manager = client.get_connection_manager_with_config(config).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl VolatileTier for RedisTier {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// In-process volatile tier. Stands in for Redis when it is unreachable at
/// startup, and backs the cache tests.
#[derive(Default)]
pub struct MemoryTier {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

#[async_trait]
impl VolatileTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("lock poisoned"))?;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("lock poisoned"))?;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

/// Two-tier cache: a volatile tier in front of the SQLite-backed durable
/// tier. Reads probe volatile first, fall back to durable, and repopulate the
/// volatile tier with the row's remaining TTL. Writes go to both tiers. No
/// cache failure ever propagates to the caller; failures degrade to misses
/// and are logged.
pub struct TieredCache {
    volatile: std::sync::Arc<dyn VolatileTier>,
    durable: Database,
    op_timeout: Duration,
}

impl TieredCache {
    pub fn new(
        volatile: std::sync::Arc<dyn VolatileTier>,
        durable: Database,
        op_timeout: Duration,
    ) -> Self {
        Self {
            volatile,
            durable,
            op_timeout,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match self.volatile_get(key).await {
            Ok(Some(payload)) => {
                debug!(key, "volatile cache hit");
                return Some(payload);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, key, "volatile cache read failed"),
        }

        let record = match self.durable.get_cache(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, key, "durable cache read failed");
                return None;
            }
        };

        debug!(key, "durable cache hit");
        let elapsed = Utc::now()
            .signed_duration_since(record.updated_at)
            .num_seconds();
        let remaining = record.ttl_seconds.saturating_sub(elapsed).max(1) as u64;
        if let Err(err) = self
            .volatile_set(key, &record.payload, Duration::from_secs(remaining))
            .await
        {
            warn!(error = %err, key, "volatile cache repopulation failed");
        }

        Some(record.payload)
    }

    pub async fn set(&self, key: &str, payload: &str, data_type: &str, ttl: Duration) {
        let volatile = self.volatile_set(key, payload, ttl).await;
        if let Err(err) = &volatile {
            warn!(error = %err, key, "volatile cache write failed");
        }
        match self
            .durable
            .upsert_cache(key, payload, data_type, ttl.as_secs() as i64)
            .await
        {
            Ok(()) => {}
            Err(err) if volatile.is_ok() => warn!(error = %err, key, "durable cache write failed"),
            Err(err) => error!(error = %err, key, "cache write failed on both tiers"),
        }
    }

    /// Drops a key from both tiers. Called when a cached payload turns out to
    /// be undeserializable, so the corrupt row cannot keep serving.
    pub async fn del(&self, key: &str) {
        if let Err(err) = self.volatile_del(key).await {
            warn!(error = %err, key, "volatile cache delete failed");
        }
        if let Err(err) = self.durable.delete_cache(key).await {
            warn!(error = %err, key, "durable cache delete failed");
        }
    }

    async fn volatile_get(&self, key: &str) -> Result<Option<String>, StageError> {
        tokio::time::timeout(self.op_timeout, self.volatile.get(key))
            .await
            .map_err(|_| StageError::CacheBackendUnavailable("read timed out".to_string()))?
            .map_err(|err| StageError::CacheBackendUnavailable(err.to_string()))
    }

    async fn volatile_set(
        &self,
        key: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), StageError> {
        tokio::time::timeout(self.op_timeout, self.volatile.set(key, payload, ttl))
            .await
            .map_err(|_| StageError::CacheBackendUnavailable("write timed out".to_string()))?
            .map_err(|err| StageError::CacheBackendUnavailable(err.to_string()))
    }

    async fn volatile_del(&self, key: &str) -> Result<(), StageError> {
        tokio::time::timeout(self.op_timeout, self.volatile.del(key))
            .await
            .map_err(|_| StageError::CacheBackendUnavailable("delete timed out".to_string()))?
            .map_err(|err| StageError::CacheBackendUnavailable(err.to_string()))
    }
}
