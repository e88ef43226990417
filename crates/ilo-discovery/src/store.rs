//! Key/value store interface and liveness bookkeeping
//!
//! The production store driver lives outside this crate; the engine talks to
//! it through [`KvStore`]. [`MemoryStore`] is the in-process implementation
//! used by default wiring and tests.
//!
//! Two key families are maintained per host:
//! - `<addr>`: boolean "alive" flag, written as "1"/"0" ("true" tolerated on
//!   read, for consumers predating the numeric form)
//! - `<addr>-health`: integer counter in `[0, 5]`

use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::warn;

/// Highest value the per-host health counter may reach.
pub const HEALTH_CEILING: i64 = 5;

/// Abstract key/value store used for liveness state.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn decr(&self, key: &str) -> Result<i64>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store used for default wiring and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn adjust(&self, key: &str, delta: i64) -> i64 {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| "0".to_string());
        let current: i64 = entry.value().parse().unwrap_or(0);
        let next = current + delta;
        *entry.value_mut() = next.to_string();
        next
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        Ok(self.adjust(key, 1))
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        Ok(self.adjust(key, -1))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Liveness view over a [`KvStore`].
///
/// A broken store must not take the scheduler down with it: every read
/// degrades to a neutral default (counter 0, flags false) with a warning, and
/// failed writes are warned and dropped.
#[derive(Clone)]
pub struct LivenessStore {
    inner: Arc<dyn KvStore>,
}

impl LivenessStore {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self { inner }
    }

    fn health_key(addr: Ipv4Addr) -> String {
        format!("{addr}-health")
    }

    fn warn_unavailable(operation: &str, err: &Error) {
        warn!(%err, operation, "key/value store unavailable, using neutral default");
    }

    /// Initialize the counter for a freshly registered host.
    pub async fn init_health(&self, addr: Ipv4Addr) {
        if let Err(e) = self.inner.set(&Self::health_key(addr), &HEALTH_CEILING.to_string()).await {
            Self::warn_unavailable("init_health", &e);
        }
    }

    /// Current counter value, clamped into `[0, 5]`.
    pub async fn health(&self, addr: Ipv4Addr) -> i64 {
        match self.inner.get(&Self::health_key(addr)).await {
            Ok(value) => value
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
                .clamp(0, HEALTH_CEILING),
            Err(e) => {
                Self::warn_unavailable("health", &e);
                0
            }
        }
    }

    /// Whether a counter has been initialized for this host.
    pub async fn has_health(&self, addr: Ipv4Addr) -> bool {
        match self.inner.exists(&Self::health_key(addr)).await {
            Ok(exists) => exists,
            Err(e) => {
                Self::warn_unavailable("has_health", &e);
                false
            }
        }
    }

    /// Increment towards the ceiling. Returns whether a change was applied.
    pub async fn bump_health(&self, addr: Ipv4Addr) -> bool {
        if self.health(addr).await >= HEALTH_CEILING {
            return false;
        }
        match self.inner.incr(&Self::health_key(addr)).await {
            Ok(_) => true,
            Err(e) => {
                Self::warn_unavailable("bump_health", &e);
                false
            }
        }
    }

    /// Decrement towards zero. Returns whether a change was applied.
    pub async fn decay_health(&self, addr: Ipv4Addr) -> bool {
        if self.health(addr).await <= 0 {
            return false;
        }
        match self.inner.decr(&Self::health_key(addr)).await {
            Ok(_) => true,
            Err(e) => {
                Self::warn_unavailable("decay_health", &e);
                false
            }
        }
    }

    /// Publish the boolean alive flag under the bare address key.
    pub async fn set_alive(&self, addr: Ipv4Addr, alive: bool) {
        let value = if alive { "1" } else { "0" };
        if let Err(e) = self.inner.set(&addr.to_string(), value).await {
            Self::warn_unavailable("set_alive", &e);
        }
    }

    /// Read the alive flag; "1" and the legacy literal "true" both count.
    pub async fn is_alive(&self, addr: Ipv4Addr) -> bool {
        match self.inner.get(&addr.to_string()).await {
            Ok(value) => matches!(value.as_deref(), Some("1") | Some("true")),
            Err(e) => {
                Self::warn_unavailable("is_alive", &e);
                false
            }
        }
    }

    /// Drop both keys for an unregistered host.
    pub async fn forget(&self, addr: Ipv4Addr) {
        for key in [addr.to_string(), Self::health_key(addr)] {
            if let Err(e) = self.inner.remove(&key).await {
                Self::warn_unavailable("forget", &e);
            }
        }
    }
}
