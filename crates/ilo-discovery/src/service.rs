//! Discovery service orchestration
//!
//! Owns the shared state, wires the components into a one-way dependency
//! chain and runs the periodic timers: scanner, registrar (pass + worker),
//! the two updaters and the heartbeat monitor. External collaborators
//! (identity transport, reachability, telemetry, queue transport, key/value
//! store) plug in through the builder; defaults give a fully in-process
//! engine suitable for development and tests.

use crate::cache::{HeartbeatCache, NetworkCache};
use crate::client::{NullTelemetryFetch, TelemetryFetch};
use crate::config::Config;
use crate::events::{InMemoryTransport, QueuePublisher, QueueTransport};
use crate::monitor::HeartbeatMonitor;
use crate::ping::{IcmpPinger, Reachability};
use crate::probe::{HttpIdentityTransport, IdentityTransport, IloProbe};
use crate::registrar::Registrar;
use crate::registry::{ClientRegistry, RegistrationLedger};
use crate::scanner::NetworkScanner;
use crate::store::{KvStore, LivenessStore, MemoryStore};
use crate::updater::ClientUpdateService;
use crate::{defaults, Result};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Derived lifecycle state of one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostState {
    /// Never classified: not probed yet, or silent so far.
    Unclassified,
    /// Probed and rejected; terminal for this process lifetime.
    Blacklisted,
    /// Active in the current bitmap but not registered yet.
    Candidate,
    /// Registered with a positive health counter.
    Live,
    /// Registered with the health counter at zero.
    Degraded,
}

/// Builder over the pluggable collaborators.
pub struct DiscoveryServiceBuilder {
    config: Config,
    identity: Option<Arc<dyn IdentityTransport>>,
    reachability: Option<Arc<dyn Reachability>>,
    telemetry: Option<Arc<dyn TelemetryFetch>>,
    queue: Option<Arc<dyn QueueTransport>>,
    kv_store: Option<Arc<dyn KvStore>>,
}

impl DiscoveryServiceBuilder {
    pub fn identity_transport(mut self, transport: Arc<dyn IdentityTransport>) -> Self {
        self.identity = Some(transport);
        self
    }

    pub fn reachability(mut self, reachability: Arc<dyn Reachability>) -> Self {
        self.reachability = Some(reachability);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryFetch>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn queue_transport(mut self, transport: Arc<dyn QueueTransport>) -> Self {
        self.queue = Some(transport);
        self
    }

    pub fn kv_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    pub fn build(self) -> Result<DiscoveryService> {
        let config = self.config;
        config.validate()?;

        let identity: Arc<dyn IdentityTransport> = match self.identity {
            Some(transport) => transport,
            // Building the trust-all TLS client can fail; that failure is
            // fatal here, at boot.
            None => Arc::new(HttpIdentityTransport::new(
                config.connect_timeout(),
                config.read_timeout(),
            )?),
        };
        let reachability = self
            .reachability
            .unwrap_or_else(|| Arc::new(IcmpPinger) as Arc<dyn Reachability>);
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(NullTelemetryFetch) as Arc<dyn TelemetryFetch>);
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryTransport::new()) as Arc<dyn QueueTransport>);
        let kv_store = self
            .kv_store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KvStore>);

        let range = config.subnet_range()?;
        let cache = Arc::new(NetworkCache::new(range));
        let store = LivenessStore::new(kv_store);
        let ledger = Arc::new(RegistrationLedger::new(store.clone()));
        let registry = Arc::new(ClientRegistry::new());
        let heartbeats = Arc::new(HeartbeatCache::new(
            defaults::HEARTBEAT_CAPACITY,
            Duration::from_secs(defaults::HEARTBEAT_TTL_SECS),
        ));
        let publisher = Arc::new(QueuePublisher::new(queue, config.queue.gzip_frame));
        let probe = Arc::new(IloProbe::new(identity.clone(), cache.clone(), ledger.clone()));
        let scanner = Arc::new(NetworkScanner::new(probe.clone(), cache.clone()));

        let registrar = Arc::new(Registrar::new(
            cache.clone(),
            ledger.clone(),
            probe.clone(),
            reachability,
            publisher.clone(),
            registry.clone(),
            store.clone(),
            heartbeats.clone(),
            config.credentials(),
            telemetry.clone(),
            Duration::from_millis(defaults::REACHABILITY_TIMEOUT_MS),
        ));

        let updater = Arc::new(ClientUpdateService::new(
            registry.clone(),
            ledger.clone(),
            publisher.clone(),
            identity,
            telemetry,
            heartbeats.clone(),
        ));

        let monitor = Arc::new(HeartbeatMonitor::new(
            ledger.clone(),
            cache.clone(),
            heartbeats.clone(),
            probe.clone(),
            store.clone(),
            config.responsiveness_threshold(),
        ));

        Ok(DiscoveryService {
            config,
            cache,
            ledger,
            registry,
            heartbeats,
            store,
            publisher,
            probe,
            scanner,
            registrar,
            updater,
            monitor,
        })
    }
}

/// The assembled discovery-and-liveness engine.
pub struct DiscoveryService {
    config: Config,
    cache: Arc<NetworkCache>,
    ledger: Arc<RegistrationLedger>,
    registry: Arc<ClientRegistry>,
    heartbeats: Arc<HeartbeatCache>,
    store: LivenessStore,
    publisher: Arc<QueuePublisher>,
    probe: Arc<IloProbe>,
    scanner: Arc<NetworkScanner>,
    registrar: Arc<Registrar>,
    updater: Arc<ClientUpdateService>,
    monitor: Arc<HeartbeatMonitor>,
}

impl DiscoveryService {
    /// Production wiring from configuration alone.
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> DiscoveryServiceBuilder {
        DiscoveryServiceBuilder {
            config,
            identity: None,
            reachability: None,
            telemetry: None,
            queue: None,
            kv_store: None,
        }
    }

    /// Run the engine until ctrl-c.
    pub async fn run(self) -> Result<()> {
        info!(
            subnet = %self.cache.range(),
            "starting discovery engine"
        );

        let handles = vec![
            self.scanner.clone().spawn(
                Duration::from_secs(defaults::SCAN_INITIAL_DELAY_SECS),
                Duration::from_secs(defaults::SCAN_INTERVAL_SECS),
            ),
            self.registrar.clone().spawn_worker(),
            self.registrar.clone().spawn(
                Duration::from_secs(defaults::REGISTRAR_INITIAL_DELAY_SECS),
                Duration::from_secs(defaults::REGISTRAR_INTERVAL_SECS),
            ),
            self.updater
                .spawn_unauthenticated(Duration::from_secs(defaults::UNAUTH_UPDATE_INTERVAL_SECS)),
            self.updater
                .spawn_authenticated(Duration::from_secs(defaults::AUTH_UPDATE_INTERVAL_SECS)),
            self.monitor.clone().spawn(
                Duration::from_secs(defaults::MONITOR_INITIAL_DELAY_SECS),
                Duration::from_secs(defaults::MONITOR_INTERVAL_SECS),
            ),
        ];

        tokio::signal::ctrl_c()
            .await
            .map_err(crate::Error::from)?;

        info!(
            registered = self.ledger.len(),
            blacklisted = self.cache.blacklist_len(),
            published = self.publisher.stats().published,
            "shutting down discovery engine"
        );
        for handle in handles {
            handle.abort();
        }

        Ok(())
    }

    /// One synchronous sweep + registration drain, for the CLI `scan`
    /// command. Returns the discovered controller addresses.
    pub async fn scan_once(&self) -> Vec<Ipv4Addr> {
        let bitmap = match self.scanner.try_scan().await {
            Some(bitmap) => bitmap,
            None => self.cache.active(),
        };

        self.registrar.pass().await;
        self.registrar.drain_pending().await;

        bitmap
            .active_indexes()
            .into_iter()
            .filter_map(|index| self.cache.address_at(index))
            .collect()
    }

    /// Explicitly un-register a controller: the only path that shrinks the
    /// registration set. Drops its snapshots, heartbeat entry and store
    /// keys along with the registration.
    pub async fn unregister(&self, addr: Ipv4Addr) -> bool {
        if !self.ledger.unregister(addr).await {
            return false;
        }
        self.registry.remove_by_address(addr);
        self.heartbeats.evict(addr);
        true
    }

    /// Derive the lifecycle state of one host.
    pub async fn host_state(&self, addr: Ipv4Addr) -> HostState {
        if self.cache.is_blacklisted(addr) {
            return HostState::Blacklisted;
        }
        if self.ledger.is_registered(addr) {
            return if self.store.health(addr).await > 0 {
                HostState::Live
            } else {
                HostState::Degraded
            };
        }
        let active = self
            .cache
            .range()
            .index_of(addr)
            .is_some_and(|index| self.cache.active().get(index));
        if active {
            HostState::Candidate
        } else {
            HostState::Unclassified
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> Arc<NetworkCache> {
        self.cache.clone()
    }

    pub fn ledger(&self) -> Arc<RegistrationLedger> {
        self.ledger.clone()
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    pub fn heartbeats(&self) -> Arc<HeartbeatCache> {
        self.heartbeats.clone()
    }

    pub fn store(&self) -> LivenessStore {
        self.store.clone()
    }

    pub fn publisher(&self) -> Arc<QueuePublisher> {
        self.publisher.clone()
    }

    pub fn probe(&self) -> Arc<IloProbe> {
        self.probe.clone()
    }

    pub fn scanner(&self) -> Arc<NetworkScanner> {
        self.scanner.clone()
    }

    pub fn registrar(&self) -> Arc<Registrar> {
        self.registrar.clone()
    }

    pub fn updater(&self) -> Arc<ClientUpdateService> {
        self.updater.clone()
    }

    pub fn monitor(&self) -> Arc<HeartbeatMonitor> {
        self.monitor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        toml::from_str(
            r#"[ilo]
username = "admin"
password = "pw"

[ilo.network]
base-ip = "10.0.0.0"
subnet-mask = "255.255.255.252"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_with_defaults() {
        let service = DiscoveryService::new(config()).unwrap();
        assert_eq!(service.cache().addresses().len(), 4);
        assert_eq!(service.scanner().concurrency(), 30);
    }

    #[tokio::test]
    async fn test_build_rejects_bad_network() {
        let mut config = config();
        config.ilo.network.subnet_mask = "255.0.255.0".into();
        assert!(DiscoveryService::new(config).is_err());
    }

    #[tokio::test]
    async fn test_host_state_unclassified_by_default() {
        let service = DiscoveryService::new(config()).unwrap();
        let state = service.host_state(Ipv4Addr::new(10, 0, 0, 1)).await;
        assert_eq!(state, HostState::Unclassified);
    }
}
