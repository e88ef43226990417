//! Registrar
//!
//! Turns newly-active bitmap indices into registered controllers. The
//! periodic pass only files registration requests (onto the outbound queue
//! and the in-process work channel) and returns; the worker does the slow
//! part: reachability check, bookkeeping, snapshot build and the auth
//! handshake.

use crate::cache::{HeartbeatCache, NetworkCache};
use crate::client::{AuthenticatedClient, IloCredentials, TelemetryFetch, UnauthenticatedClient};
use crate::error::{Error, Result};
use crate::events::{QueuePublisher, RegistrationRequest};
use crate::ping::Reachability;
use crate::probe::IloProbe;
use crate::registry::{ClientRegistry, RegistrationLedger};
use crate::store::LivenessStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct Registrar {
    cache: Arc<NetworkCache>,
    ledger: Arc<RegistrationLedger>,
    probe: Arc<IloProbe>,
    reachability: Arc<dyn Reachability>,
    publisher: Arc<QueuePublisher>,
    registry: Arc<ClientRegistry>,
    store: LivenessStore,
    heartbeats: Arc<HeartbeatCache>,
    credentials: IloCredentials,
    telemetry: Arc<dyn TelemetryFetch>,
    ping_timeout: Duration,
    pending_tx: UnboundedSender<RegistrationRequest>,
    pending_rx: Mutex<UnboundedReceiver<RegistrationRequest>>,
}

impl Registrar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<NetworkCache>,
        ledger: Arc<RegistrationLedger>,
        probe: Arc<IloProbe>,
        reachability: Arc<dyn Reachability>,
        publisher: Arc<QueuePublisher>,
        registry: Arc<ClientRegistry>,
        store: LivenessStore,
        heartbeats: Arc<HeartbeatCache>,
        credentials: IloCredentials,
        telemetry: Arc<dyn TelemetryFetch>,
        ping_timeout: Duration,
    ) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        Self {
            cache,
            ledger,
            probe,
            reachability,
            publisher,
            registry,
            store,
            heartbeats,
            credentials,
            telemetry,
            ping_timeout,
            pending_tx,
            pending_rx: Mutex::new(pending_rx),
        }
    }

    /// One registrar pass: file a request for every active address that is
    /// neither blacklisted nor registered. Returns the number filed.
    pub async fn pass(&self) -> usize {
        let bitmap = self.cache.active();
        let mut filed = 0;

        for index in bitmap.active_indexes() {
            let Some(addr) = self.cache.address_at(index) else {
                continue;
            };
            if self.cache.is_blacklisted(addr) || self.ledger.is_registered(addr) {
                continue;
            }

            let request = RegistrationRequest::new(addr);
            // Publish failure is logged by the publisher; the in-process
            // handoff below still happens so discovery does not stall on a
            // broker outage.
            let _ = self.publisher.registration_requested(&request).await;

            if self.pending_tx.send(request).is_ok() {
                filed += 1;
            }
        }

        if filed > 0 {
            info!(filed, "filed registration requests");
        }
        filed
    }

    /// Handle one registration request end to end.
    pub async fn process_request(&self, request: RegistrationRequest) -> Result<()> {
        let addr = request.ilo_address;

        if self.ledger.is_registered(addr) {
            warn!(%addr, "already registered, dropping request");
            return Ok(());
        }

        if !self.reachability.is_reachable(addr, self.ping_timeout).await {
            // Not blacklisted: the host may be back for a later pass.
            info!(%addr, "no echo answer, dropping registration request");
            return Err(Error::Unreachable(addr, self.ping_timeout));
        }

        let registered = self.ledger.register(addr).await;
        if !registered {
            // Lost the race against a concurrent request for the same host.
            warn!(%addr, "already registered, dropping request");
            return Ok(());
        }

        self.store.init_health(addr).await;
        self.heartbeats.touch(addr);

        let summary = self.probe.fetch_summary(addr).await?;
        let unauthenticated = UnauthenticatedClient::from_summary(addr, &summary);
        let uuid = unauthenticated.ilo_uuid.clone();
        self.registry.insert_unauthenticated(unauthenticated.clone());
        info!(%addr, %uuid, "registered unauthenticated client");

        match AuthenticatedClient::connect(
            self.credentials.clone(),
            &unauthenticated,
            self.telemetry.as_ref(),
        )
        .await
        {
            Ok(authenticated) => {
                self.registry.insert_authenticated(authenticated);
                info!(%addr, %uuid, "auth handshake succeeded");
            }
            Err(e) => {
                // Unauthenticated registration stands on its own.
                info!(%addr, %e, "auth handshake failed, continuing unauthenticated");
            }
        }

        Ok(())
    }

    /// Process everything currently queued. Used by tests and the one-shot
    /// CLI path; the daemon runs [`spawn_worker`](Self::spawn_worker)
    /// instead.
    pub async fn drain_pending(&self) -> usize {
        let mut receiver = self.pending_rx.lock().await;
        let mut processed = 0;

        while let Ok(request) = receiver.try_recv() {
            let addr = request.ilo_address;
            if let Err(e) = self.process_request(request).await {
                // Per-host failures are contained here so the remaining
                // requests still get their turn.
                debug!(%addr, %e, "registration request dropped");
            }
            processed += 1;
        }
        processed
    }

    /// Long-running request worker.
    pub fn spawn_worker(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut receiver = self.pending_rx.lock().await;
            while let Some(request) = receiver.recv().await {
                let addr = request.ilo_address;
                if let Err(e) = self.process_request(request).await {
                    if e.is_per_host() {
                        debug!(%addr, %e, "registration request dropped");
                    } else {
                        error!(%addr, %e, "registration request failed");
                    }
                }
            }
        })
    }

    /// Spawn the periodic registrar pass.
    pub fn spawn(self: Arc<Self>, initial_delay: Duration, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticks.tick().await;
                self.pass().await;
            }
        })
    }
}
