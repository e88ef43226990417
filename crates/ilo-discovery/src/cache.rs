//! Shared network state caches
//!
//! [`NetworkCache`] holds the three pieces of scan state the periodic tasks
//! share: the enumerated address range (written once at boot), the process
//! blacklist, and the active bitmap produced by the most recent completed
//! scan. [`HeartbeatCache`] is the bounded, write-expiring map of last-update
//! times consumed by the heartbeat monitor.

use crate::bitmap::Bitmap;
use crate::subnet::SubnetRange;
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Scan state shared between the scanner, registrar and monitor.
pub struct NetworkCache {
    range: SubnetRange,
    addresses: Vec<Ipv4Addr>,
    blacklist: DashSet<Ipv4Addr>,
    /// Most recently completed scan. Swapped whole; readers either see this
    /// bitmap or the previous one, never a partial scan.
    active: RwLock<Arc<Bitmap>>,
}

impl NetworkCache {
    pub fn new(range: SubnetRange) -> Self {
        let addresses = range.addresses();
        let capacity = addresses.len();
        info!(subnet = %range, addresses = capacity, "cached subnet address range");

        Self {
            range,
            addresses,
            blacklist: DashSet::new(),
            active: RwLock::new(Arc::new(Bitmap::new(capacity))),
        }
    }

    pub fn range(&self) -> &SubnetRange {
        &self.range
    }

    /// The enumerated candidate addresses, ascending. Read-only after boot.
    pub fn addresses(&self) -> &[Ipv4Addr] {
        &self.addresses
    }

    pub fn address_at(&self, index: usize) -> Option<Ipv4Addr> {
        self.addresses.get(index).copied()
    }

    // ------------------------------------------------------------------
    // Blacklist: append-only for the process lifetime
    // ------------------------------------------------------------------

    pub fn is_blacklisted(&self, addr: Ipv4Addr) -> bool {
        self.blacklist.contains(&addr)
    }

    pub fn blacklist(&self, addr: Ipv4Addr) {
        if self.blacklist.insert(addr) {
            info!(%addr, "blacklisted address");
        }
    }

    pub fn blacklisted_addresses(&self) -> Vec<Ipv4Addr> {
        self.blacklist.iter().map(|entry| *entry).collect()
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    // ------------------------------------------------------------------
    // Active bitmap: replaced atomically by the scanner
    // ------------------------------------------------------------------

    /// Snapshot of the current active bitmap.
    pub fn active(&self) -> Arc<Bitmap> {
        self.active.read().clone()
    }

    /// Publish a freshly completed scan.
    pub fn replace_active(&self, bitmap: Bitmap) -> Arc<Bitmap> {
        let bitmap = Arc::new(bitmap);
        *self.active.write() = bitmap.clone();
        bitmap
    }
}

/// Bounded map of `address -> last successful update time`.
///
/// Entries expire `ttl` after their most recent write and the map never
/// holds more than `capacity` entries; when full, the stalest entry makes
/// room. Expired entries read as absent.
pub struct HeartbeatCache {
    entries: Mutex<HashMap<Ipv4Addr, Instant>>,
    capacity: usize,
    ttl: Duration,
}

impl HeartbeatCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            ttl,
        }
    }

    /// Record an update for `addr` at the current instant.
    pub fn touch(&self, addr: Ipv4Addr) {
        self.touch_at(addr, Instant::now());
    }

    fn touch_at(&self, addr: Ipv4Addr, at: Instant) {
        let mut entries = self.entries.lock();

        if entries.len() >= self.capacity && !entries.contains_key(&addr) {
            // Evict the stalest entry to respect the bound.
            if let Some(stalest) = entries
                .iter()
                .min_by_key(|(_, instant)| **instant)
                .map(|(key, _)| *key)
            {
                entries.remove(&stalest);
            }
        }

        entries.insert(addr, at);
    }

    /// Last update time, or `None` when the entry is absent or expired.
    pub fn last_update(&self, addr: Ipv4Addr) -> Option<Instant> {
        let mut entries = self.entries.lock();
        match entries.get(&addr) {
            Some(instant) if instant.elapsed() <= self.ttl => Some(*instant),
            Some(_) => {
                entries.remove(&addr);
                None
            }
            None => None,
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.last_update(addr).is_some()
    }

    pub fn evict(&self, addr: Ipv4Addr) {
        self.entries.lock().remove(&addr);
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock();
        entries
            .values()
            .filter(|instant| instant.elapsed() <= self.ttl)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
