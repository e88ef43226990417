//! Client update service
//!
//! Two independent cadences refresh the registries and feed the snapshot
//! queues. Each entry refreshes on its own spawned task (the runtime's
//! work-stealing pool), so one slow controller never holds up the rest and
//! no cross-entry ordering exists. Per-entry overlap is prevented by the
//! registry's in-flight guard; a tick that lands while an entry is still
//! refreshing skips that entry.

use crate::cache::HeartbeatCache;
use crate::client::{AuthenticatedClient, TelemetryFetch, UnauthenticatedClient};
use crate::events::QueuePublisher;
use crate::probe::IdentityTransport;
use crate::registry::{ClientRegistry, RegistrationLedger, UpdateKind};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Cheap to clone: every field is a shared handle, and each per-entry
/// refresh task carries its own clone.
#[derive(Clone)]
pub struct ClientUpdateService {
    registry: Arc<ClientRegistry>,
    ledger: Arc<RegistrationLedger>,
    publisher: Arc<QueuePublisher>,
    identity: Arc<dyn IdentityTransport>,
    telemetry: Arc<dyn TelemetryFetch>,
    heartbeats: Arc<HeartbeatCache>,
}

impl ClientUpdateService {
    pub fn new(
        registry: Arc<ClientRegistry>,
        ledger: Arc<RegistrationLedger>,
        publisher: Arc<QueuePublisher>,
        identity: Arc<dyn IdentityTransport>,
        telemetry: Arc<dyn TelemetryFetch>,
        heartbeats: Arc<HeartbeatCache>,
    ) -> Self {
        Self {
            registry,
            ledger,
            publisher,
            identity,
            telemetry,
            heartbeats,
        }
    }

    /// One unauthenticated update tick. Returns the number of entries
    /// dispatched (not skipped).
    pub async fn tick_unauthenticated(&self) -> usize {
        let now = Utc::now();
        let mut dispatched = 0;

        for client in self.registry.unauthenticated_snapshot() {
            if !self.ledger.is_registered(client.address) {
                debug!(addr = %client.address, "entry no longer registered, skipping");
                continue;
            }
            if !client.can_update(now) {
                continue;
            }
            if !self.registry.begin_update(UpdateKind::Unauthenticated, &client.ilo_uuid) {
                debug!(uuid = %client.ilo_uuid, "previous update still running, skipping");
                continue;
            }

            dispatched += 1;
            let service = self.clone();
            tokio::spawn(async move {
                service.refresh_unauthenticated(client).await;
            });
        }

        dispatched
    }

    async fn refresh_unauthenticated(&self, mut client: UnauthenticatedClient) {
        let uuid = client.ilo_uuid.clone();

        match client.update(self.identity.as_ref()).await {
            Ok(()) => {
                self.heartbeats.touch(client.address);
                let _ = self.publisher.unauthenticated_snapshot(&client).await;
            }
            Err(e) => {
                warn!(addr = %client.address, %e, "unauthenticated update failed");
            }
        }

        // The refreshed copy (or its failure count) becomes the entry.
        self.registry.insert_unauthenticated(client);
        self.registry.finish_update(UpdateKind::Unauthenticated, &uuid);
    }

    /// One authenticated update tick.
    pub async fn tick_authenticated(&self) -> usize {
        let now = Utc::now();
        let mut dispatched = 0;

        for client in self.registry.authenticated_snapshot() {
            if !self.ledger.is_registered(client.address) {
                debug!(addr = %client.address, "entry no longer registered, skipping");
                continue;
            }
            if !client.can_update(now) {
                continue;
            }
            if !self.registry.begin_update(UpdateKind::Authenticated, &client.ilo_uuid) {
                debug!(uuid = %client.ilo_uuid, "previous update still running, skipping");
                continue;
            }

            dispatched += 1;
            let service = self.clone();
            tokio::spawn(async move {
                service.refresh_authenticated(client).await;
            });
        }

        dispatched
    }

    async fn refresh_authenticated(&self, mut client: AuthenticatedClient) {
        let uuid = client.ilo_uuid.clone();

        match client.update(self.telemetry.as_ref()).await {
            Ok(()) => {
                self.heartbeats.touch(client.address);
                let _ = self.publisher.authenticated_snapshot(&client).await;
            }
            Err(e) => {
                warn!(addr = %client.address, %e, "authenticated update failed");
            }
        }

        self.registry.insert_authenticated(client);
        self.registry.finish_update(UpdateKind::Authenticated, &uuid);
    }

    /// Spawn the unauthenticated update loop.
    pub fn spawn_unauthenticated(&self, period: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                service.tick_unauthenticated().await;
            }
        })
    }

    /// Spawn the authenticated update loop.
    pub fn spawn_authenticated(&self, period: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                service.tick_authenticated().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        AuthenticatedClient, IloCredentials, NullTelemetryFetch, UnauthenticatedClient,
    };
    use crate::events::{
        InMemoryTransport, AUTHENTICATED_CLIENT_QUEUE, UNAUTHENTICATED_CLIENT_QUEUE,
    };
    use crate::probe::StaticIdentityTransport;
    use crate::rimp::parse_rimp;
    use crate::store::{LivenessStore, MemoryStore};
    use chrono::TimeDelta;
    use std::net::Ipv4Addr;

    const RIMP_BODY: &str = "<RIMP><HSI><SBSN>CZ1</SBSN><cUUID>u-1</cUUID></HSI></RIMP>";
    const ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

    struct Fixture {
        transport: Arc<StaticIdentityTransport>,
        queue: Arc<InMemoryTransport>,
        registry: Arc<ClientRegistry>,
        ledger: Arc<RegistrationLedger>,
        heartbeats: Arc<HeartbeatCache>,
        service: Arc<ClientUpdateService>,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(StaticIdentityTransport::new());
        let queue = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(ClientRegistry::new());
        let ledger = Arc::new(RegistrationLedger::new(LivenessStore::new(Arc::new(
            MemoryStore::new(),
        ))));
        let heartbeats = Arc::new(HeartbeatCache::new(1000, Duration::from_secs(600)));

        let service = Arc::new(ClientUpdateService::new(
            registry.clone(),
            ledger.clone(),
            Arc::new(QueuePublisher::new(queue.clone(), false)),
            transport.clone(),
            Arc::new(NullTelemetryFetch),
            heartbeats.clone(),
        ));

        Fixture {
            transport,
            queue,
            registry,
            ledger,
            heartbeats,
            service,
        }
    }

    fn stale_unauth_client() -> UnauthenticatedClient {
        let mut client =
            UnauthenticatedClient::from_summary(ADDR, &parse_rimp(RIMP_BODY, ADDR).unwrap());
        // Old enough to pass the update gate.
        client.last_refreshed = Utc::now() - TimeDelta::seconds(60);
        client
    }

    async fn settle() {
        // Let the spawned refresh tasks run to completion.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_tick_refreshes_and_publishes() {
        let fixture = fixture();
        fixture.transport.respond_ok(ADDR, RIMP_BODY);
        fixture.ledger.register(ADDR).await;
        fixture.registry.insert_unauthenticated(stale_unauth_client());

        assert_eq!(fixture.service.tick_unauthenticated().await, 1);
        settle().await;

        assert_eq!(fixture.queue.bodies_for(UNAUTHENTICATED_CLIENT_QUEUE).len(), 1);
        assert!(fixture.heartbeats.contains(ADDR));

        let entry = fixture.registry.unauthenticated("u-1").unwrap();
        assert_eq!(entry.update_failures, 0);
    }

    #[tokio::test]
    async fn test_unregistered_entries_are_skipped() {
        let fixture = fixture();
        fixture.transport.respond_ok(ADDR, RIMP_BODY);
        fixture.registry.insert_unauthenticated(stale_unauth_client());

        assert_eq!(fixture.service.tick_unauthenticated().await, 0);
        settle().await;

        assert!(fixture.queue.messages().is_empty());
        assert!(!fixture.heartbeats.contains(ADDR));
    }

    #[tokio::test]
    async fn test_update_gate_skips_fresh_entries() {
        let fixture = fixture();
        fixture.transport.respond_ok(ADDR, RIMP_BODY);
        fixture.ledger.register(ADDR).await;

        let fresh = UnauthenticatedClient::from_summary(ADDR, &parse_rimp(RIMP_BODY, ADDR).unwrap());
        fixture.registry.insert_unauthenticated(fresh);

        assert_eq!(fixture.service.tick_unauthenticated().await, 0);
    }

    #[tokio::test]
    async fn test_in_flight_entry_is_skipped() {
        let fixture = fixture();
        fixture.transport.respond_ok(ADDR, RIMP_BODY);
        fixture.ledger.register(ADDR).await;
        fixture.registry.insert_unauthenticated(stale_unauth_client());

        // Simulate a previous update still holding the guard.
        assert!(fixture.registry.begin_update(UpdateKind::Unauthenticated, "u-1"));
        assert_eq!(fixture.service.tick_unauthenticated().await, 0);

        fixture.registry.finish_update(UpdateKind::Unauthenticated, "u-1");
        assert_eq!(fixture.service.tick_unauthenticated().await, 1);
        settle().await;
    }

    #[tokio::test]
    async fn test_failed_update_counts_and_skips_heartbeat() {
        let fixture = fixture();
        fixture.transport.respond_status(ADDR, 500, "maintenance");
        fixture.ledger.register(ADDR).await;
        fixture.registry.insert_unauthenticated(stale_unauth_client());

        fixture.service.tick_unauthenticated().await;
        settle().await;

        assert!(fixture.queue.messages().is_empty());
        assert!(!fixture.heartbeats.contains(ADDR));
        let entry = fixture.registry.unauthenticated("u-1").unwrap();
        assert_eq!(entry.update_failures, 1);
    }

    #[tokio::test]
    async fn test_authenticated_tick_publishes() {
        let fixture = fixture();
        fixture.ledger.register(ADDR).await;

        let unauth = stale_unauth_client();
        let mut auth = AuthenticatedClient::connect(
            IloCredentials::new("admin", "pw", false),
            &unauth,
            &NullTelemetryFetch,
        )
        .await
        .unwrap();
        auth.last_refreshed = Utc::now() - TimeDelta::seconds(60);
        fixture.registry.insert_authenticated(auth);

        assert_eq!(fixture.service.tick_authenticated().await, 1);
        settle().await;

        assert_eq!(fixture.queue.bodies_for(AUTHENTICATED_CLIENT_QUEUE).len(), 1);
        assert!(fixture.heartbeats.contains(ADDR));
    }
}
