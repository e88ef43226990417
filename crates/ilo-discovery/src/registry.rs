//! Registration ledger and client registries
//!
//! The ledger is the authoritative in-process set of accepted controller
//! addresses with write-through onto the liveness store. The client
//! registries hold the current unauthenticated/authenticated snapshots keyed
//! by iLO UUID, plus the per-entry in-flight guard the updaters use to keep
//! refreshes of the same entry from overlapping.

use crate::client::{AuthenticatedClient, UnauthenticatedClient};
use crate::store::LivenessStore;
use dashmap::{DashMap, DashSet};
use std::net::Ipv4Addr;
use tracing::info;

/// Write-through set of registered controller addresses.
///
/// Membership only changes through [`register`](Self::register) and
/// [`unregister`](Self::unregister); no background path evicts entries.
pub struct RegistrationLedger {
    registered: DashSet<Ipv4Addr>,
    store: LivenessStore,
}

impl RegistrationLedger {
    pub fn new(store: LivenessStore) -> Self {
        Self {
            registered: DashSet::new(),
            store,
        }
    }

    /// Fast membership check against the in-process set. May lag an
    /// in-flight registration by at most one cadence.
    pub fn is_registered(&self, addr: Ipv4Addr) -> bool {
        self.registered.contains(&addr)
    }

    /// Mark an address registered and write the alive flag through to the
    /// store. Returns `false` when the address was already registered.
    pub async fn register(&self, addr: Ipv4Addr) -> bool {
        if !self.registered.insert(addr) {
            return false;
        }
        info!(%addr, "registered controller");
        self.store.set_alive(addr, true).await;
        true
    }

    /// Explicit removal; the only path that shrinks the set.
    pub async fn unregister(&self, addr: Ipv4Addr) -> bool {
        if self.registered.remove(&addr).is_none() {
            return false;
        }
        info!(%addr, "unregistered controller");
        self.store.forget(addr).await;
        true
    }

    pub fn registered_addresses(&self) -> Vec<Ipv4Addr> {
        self.registered.iter().map(|entry| *entry).collect()
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}

/// Snapshot stores for both client flavours, keyed by iLO UUID.
///
/// The updaters work on owned copies: take a snapshot, refresh it, then
/// replace the entry. The in-flight set keeps two refreshes of the same
/// entry from racing; entries for different controllers never wait on each
/// other.
#[derive(Default)]
pub struct ClientRegistry {
    unauthenticated: DashMap<String, UnauthenticatedClient>,
    authenticated: DashMap<String, AuthenticatedClient>,
    in_flight: DashSet<String>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_unauthenticated(&self, client: UnauthenticatedClient) {
        self.unauthenticated.insert(client.ilo_uuid.clone(), client);
    }

    pub fn insert_authenticated(&self, client: AuthenticatedClient) {
        self.authenticated.insert(client.ilo_uuid.clone(), client);
    }

    pub fn unauthenticated(&self, uuid: &str) -> Option<UnauthenticatedClient> {
        self.unauthenticated.get(uuid).map(|entry| entry.value().clone())
    }

    pub fn authenticated(&self, uuid: &str) -> Option<AuthenticatedClient> {
        self.authenticated.get(uuid).map(|entry| entry.value().clone())
    }

    /// Owned copies of every unauthenticated entry.
    pub fn unauthenticated_snapshot(&self) -> Vec<UnauthenticatedClient> {
        self.unauthenticated
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Owned copies of every authenticated entry.
    pub fn authenticated_snapshot(&self) -> Vec<AuthenticatedClient> {
        self.authenticated
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drop every snapshot belonging to `addr` (used on unregister).
    pub fn remove_by_address(&self, addr: Ipv4Addr) {
        self.unauthenticated.retain(|_, client| client.address != addr);
        self.authenticated.retain(|_, client| client.address != addr);
    }

    pub fn unauthenticated_len(&self) -> usize {
        self.unauthenticated.len()
    }

    pub fn authenticated_len(&self) -> usize {
        self.authenticated.len()
    }

    // ------------------------------------------------------------------
    // Per-entry update guard
    // ------------------------------------------------------------------

    /// Claim an entry for an update pass. Returns `false` while a previous
    /// update of the same entry is still running; the caller skips the tick.
    pub fn begin_update(&self, kind: UpdateKind, uuid: &str) -> bool {
        self.in_flight.insert(guard_key(kind, uuid))
    }

    pub fn finish_update(&self, kind: UpdateKind, uuid: &str) {
        self.in_flight.remove(&guard_key(kind, uuid));
    }
}

/// Which registry an update pass targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Unauthenticated,
    Authenticated,
}

fn guard_key(kind: UpdateKind, uuid: &str) -> String {
    match kind {
        UpdateKind::Unauthenticated => format!("unauth:{uuid}"),
        UpdateKind::Authenticated => format!("auth:{uuid}"),
    }
}
