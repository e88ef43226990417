//! End-to-end discovery flows over in-memory collaborators
//!
//! Each test assembles the engine with a scripted identification endpoint,
//! an in-memory queue transport and store, and drives the periodic passes
//! by hand.

use ilo_discovery::events::{InMemoryTransport, NEW_CLIENT_REQUEST_QUEUE};
use ilo_discovery::ping::StaticReachability;
use ilo_discovery::probe::StaticIdentityTransport;
use ilo_discovery::store::MemoryStore;
use ilo_discovery::{
    Config, DiscoveryService, HostState, ProbeFailure, RegistrationRequest, Responsiveness,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

const RIMP_BODY: &str = "<RIMP><HSI><SBSN>X</SBSN></HSI></RIMP>";

const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

struct Harness {
    endpoints: Arc<StaticIdentityTransport>,
    queue: Arc<InMemoryTransport>,
    service: DiscoveryService,
}

/// Engine over 10.0.0.0/30 with everything in-process.
fn harness(responsiveness_threshold_ms: u64) -> Harness {
    let toml = format!(
        r#"[ilo]
username = "admin"
password = "pw"

[ilo.network]
base-ip = "10.0.0.0"
subnet-mask = "255.255.255.252"

[client]
responsiveness-threshold-ms = {responsiveness_threshold_ms}
"#
    );
    let config: Config = toml::from_str(&toml).unwrap();

    let endpoints = Arc::new(StaticIdentityTransport::new());
    let queue = Arc::new(InMemoryTransport::new());

    let service = DiscoveryService::builder(config)
        .identity_transport(endpoints.clone())
        .queue_transport(queue.clone())
        .kv_store(Arc::new(MemoryStore::new()))
        .reachability(Arc::new(StaticReachability::reachable()))
        .build()
        .unwrap();

    Harness {
        endpoints,
        queue,
        service,
    }
}

#[tokio::test]
async fn single_host_discovery_on_a_slash_30() {
    let h = harness(300_000);
    // 10.0.0.1 is an iLO; the other three addresses refuse/stay silent.
    h.endpoints.respond_ok(HOST, RIMP_BODY);

    let discovered = h.service.scan_once().await;

    assert_eq!(discovered, vec![HOST]);
    assert_eq!(h.service.cache().active().active_indexes(), vec![1]);

    // Registration happened for exactly the one host.
    assert!(h.service.ledger().is_registered(HOST));
    assert_eq!(h.service.ledger().len(), 1);

    // The silent addresses are blacklisted.
    for silent in [
        Ipv4Addr::new(10, 0, 0, 0),
        Ipv4Addr::new(10, 0, 0, 2),
        Ipv4Addr::new(10, 0, 0, 3),
    ] {
        assert!(h.service.cache().is_blacklisted(silent));
    }

    // Exactly one registration request went out.
    let requests = h.queue.bodies_for(NEW_CLIENT_REQUEST_QUEUE);
    assert_eq!(requests.len(), 1);
    let request: RegistrationRequest = serde_json::from_slice(&requests[0]).unwrap();
    assert_eq!(request.ilo_address, HOST);
    assert_eq!(request.client_hint, "Discovery-10001");

    // Registration initialized the liveness state.
    assert_eq!(h.service.store().health(HOST).await, 5);
    assert!(h.service.store().is_alive(HOST).await);
    assert!(h.service.heartbeats().contains(HOST));
    assert_eq!(h.service.registry().unauthenticated_len(), 1);
    assert_eq!(h.service.host_state(HOST).await, HostState::Live);
}

#[tokio::test]
async fn malformed_response_blacklists_without_registration() {
    let h = harness(300_000);
    h.endpoints.respond_ok(HOST, "<HTML>nope</HTML>");

    let discovered = h.service.scan_once().await;

    assert!(discovered.is_empty());
    assert!(h.service.cache().is_blacklisted(HOST));
    assert!(!h.service.ledger().is_registered(HOST));
    assert!(h.queue.messages().is_empty());
    assert_eq!(h.service.host_state(HOST).await, HostState::Blacklisted);
}

#[tokio::test]
async fn blacklist_sticks_across_scans() {
    let h = harness(300_000);
    h.endpoints.respond_ok(HOST, "<HTML>nope</HTML>");

    h.service.scan_once().await;
    let fetches_after_first = h.endpoints.fetch_count();
    assert_eq!(fetches_after_first, 4);

    // Even though the endpoint would now answer correctly, the second scan
    // performs zero HTTPS calls: every address is blacklisted.
    h.endpoints.respond_ok(HOST, RIMP_BODY);
    h.service.scan_once().await;

    assert_eq!(h.endpoints.fetch_count(), fetches_after_first);
}

#[tokio::test]
async fn health_decays_but_host_stays_alive() {
    let h = harness(300_000);
    h.endpoints.respond_ok(HOST, RIMP_BODY);
    h.service.scan_once().await;
    assert_eq!(h.service.store().health(HOST).await, 5);

    // Controller goes dark for three consecutive health passes.
    h.endpoints
        .respond_error(HOST, ProbeFailure::Timeout { connect: true });
    for expected in [4, 3, 2] {
        h.service.monitor().health_pass().await;
        assert_eq!(h.service.store().health(HOST).await, expected);
        assert!(h.service.store().is_alive(HOST).await);
    }

    assert_eq!(h.service.host_state(HOST).await, HostState::Live);
}

#[tokio::test]
async fn unresponsive_host_is_reported_but_stays_registered() {
    let h = harness(100);
    h.endpoints.respond_ok(HOST, RIMP_BODY);
    h.service.scan_once().await;

    // No further heartbeat writes; cross the threshold.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let report = h.service.monitor().responsiveness_pass();
    assert_eq!(report, vec![(HOST, Responsiveness::Unresponsive)]);
    assert!(h.service.ledger().is_registered(HOST));
}

#[tokio::test]
async fn duplicate_registration_requests_collapse() {
    let h = harness(300_000);
    h.endpoints.respond_ok(HOST, RIMP_BODY);

    let registrar = h.service.registrar();
    registrar
        .process_request(RegistrationRequest::new(HOST))
        .await
        .unwrap();
    registrar
        .process_request(RegistrationRequest::new(HOST))
        .await
        .unwrap();

    assert_eq!(h.service.ledger().len(), 1);
    assert_eq!(h.service.registry().unauthenticated_len(), 1);
    assert_eq!(h.service.registry().authenticated_len(), 1);
}

#[tokio::test]
async fn unreachable_candidate_is_not_registered_and_may_recover() {
    let toml = r#"[ilo]
username = "admin"
password = "pw"

[ilo.network]
base-ip = "10.0.0.0"
subnet-mask = "255.255.255.252"
"#;
    let config: Config = toml::from_str(toml).unwrap();
    let endpoints = Arc::new(StaticIdentityTransport::new());
    let queue = Arc::new(InMemoryTransport::new());

    let service = DiscoveryService::builder(config)
        .identity_transport(endpoints.clone())
        .queue_transport(queue.clone())
        .kv_store(Arc::new(MemoryStore::new()))
        .reachability(Arc::new(StaticReachability::unreachable()))
        .build()
        .unwrap();

    endpoints.respond_ok(HOST, RIMP_BODY);
    service.scan_once().await;

    // The HTTPS probe succeeded but the echo did not: host stays a
    // candidate, not blacklisted, eligible for the next registrar pass.
    assert!(!service.ledger().is_registered(HOST));
    assert!(!service.cache().is_blacklisted(HOST));
    assert_eq!(service.host_state(HOST).await, HostState::Candidate);

    // The registration request still went onto the queue.
    assert_eq!(queue.bodies_for(NEW_CLIENT_REQUEST_QUEUE).len(), 1);
}

#[tokio::test]
async fn registered_host_survives_rescan_without_network_io() {
    let h = harness(300_000);
    h.endpoints.respond_ok(HOST, RIMP_BODY);
    h.service.scan_once().await;
    assert!(h.service.ledger().is_registered(HOST));

    let fetches_before = h.endpoints.fetch_count();
    let discovered = h.service.scan_once().await;

    // The registered host stays active with zero identification calls
    // (probe idempotence over registered addresses).
    assert_eq!(discovered, vec![HOST]);
    assert_eq!(h.endpoints.fetch_count(), fetches_before);
}

#[tokio::test]
async fn tick_isolation_one_bad_host_does_not_block_others() {
    // A /29 with two controllers, one of which explodes on registration.
    let toml = r#"[ilo]
username = "admin"
password = "pw"

[ilo.network]
base-ip = "10.0.0.0"
subnet-mask = "255.255.255.248"
"#;
    let config: Config = toml::from_str(toml).unwrap();
    let endpoints = Arc::new(StaticIdentityTransport::new());

    let service = DiscoveryService::builder(config)
        .identity_transport(endpoints.clone())
        .queue_transport(Arc::new(InMemoryTransport::new()))
        .kv_store(Arc::new(MemoryStore::new()))
        .reachability(Arc::new(StaticReachability::reachable()))
        .build()
        .unwrap();

    let good = Ipv4Addr::new(10, 0, 0, 5);
    let flaky = Ipv4Addr::new(10, 0, 0, 2);
    endpoints.respond_ok(good, "<RIMP><HSI><SBSN>GOOD</SBSN></HSI></RIMP>");
    endpoints.respond_ok(flaky, RIMP_BODY);

    service.scanner().try_scan().await.unwrap();

    // Between scan and registration the flaky host starts failing, so its
    // snapshot build errors out mid-drain.
    endpoints.respond_status(flaky, 500, "maintenance");
    service.registrar().pass().await;
    service.registrar().drain_pending().await;

    // The good host registered regardless.
    assert!(service.ledger().is_registered(good));
    assert_eq!(service.registry().unauthenticated_len(), 1);
}

#[tokio::test]
async fn explicit_unregister_drops_all_host_state() {
    let h = harness(300_000);
    h.endpoints.respond_ok(HOST, RIMP_BODY);
    h.service.scan_once().await;
    assert!(h.service.ledger().is_registered(HOST));

    assert!(h.service.unregister(HOST).await);

    assert!(!h.service.ledger().is_registered(HOST));
    assert_eq!(h.service.registry().unauthenticated_len(), 0);
    assert_eq!(h.service.registry().authenticated_len(), 0);
    assert!(!h.service.heartbeats().contains(HOST));
    assert!(!h.service.store().has_health(HOST).await);

    // Not blacklisted either: the host may be rediscovered.
    assert!(!h.service.cache().is_blacklisted(HOST));
    assert!(!h.service.unregister(HOST).await);
}

#[tokio::test]
async fn update_feed_publishes_snapshots_for_registered_hosts() {
    use ilo_discovery::events::UNAUTHENTICATED_CLIENT_QUEUE;

    let h = harness(300_000);
    h.endpoints.respond_ok(HOST, RIMP_BODY);
    h.service.scan_once().await;

    // Age the entry past the update gate, then run one updater tick.
    let client = h
        .service
        .registry()
        .unauthenticated_snapshot()
        .pop()
        .unwrap();
    let mut aged = client.clone();
    aged.last_refreshed = chrono::Utc::now() - chrono::TimeDelta::seconds(60);
    h.service.registry().insert_unauthenticated(aged);

    h.service.updater().tick_unauthenticated().await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    let snapshots = h.queue.bodies_for(UNAUTHENTICATED_CLIENT_QUEUE);
    assert_eq!(snapshots.len(), 1);

    let decoded: ilo_discovery::UnauthenticatedClient =
        serde_json::from_slice(&snapshots[0]).unwrap();
    assert_eq!(decoded.address, HOST);
    assert_eq!(decoded.ilo_uuid, client.ilo_uuid);
}
