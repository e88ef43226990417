//! Heartbeat monitor and health-counter pass
//!
//! Two independent liveness signals are maintained per registered host:
//! - the heartbeat timestamp map measures long-term update agreement (is the
//!   updater still succeeding against this controller?)
//! - the 0..5 health counter measures short-term probe agreement (does the
//!   identification endpoint still answer right now?)
//! The monitor reports; eviction from the registration set stays an explicit
//! operator action.

use crate::cache::{HeartbeatCache, NetworkCache};
use crate::probe::IloProbe;
use crate::registry::RegistrationLedger;
use crate::store::LivenessStore;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Verdict for one host in a responsiveness pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responsiveness {
    /// Updated within the threshold.
    Responsive,
    /// Last update is older than the threshold.
    Unresponsive,
    /// No heartbeat entry (expired or evicted by the size bound).
    Evicted,
    /// Blacklisted hosts are not judged.
    Skipped,
}

/// One responsiveness pass over the registered set.
pub type HeartbeatReport = Vec<(Ipv4Addr, Responsiveness)>;

pub struct HeartbeatMonitor {
    ledger: Arc<RegistrationLedger>,
    cache: Arc<NetworkCache>,
    heartbeats: Arc<HeartbeatCache>,
    probe: Arc<IloProbe>,
    store: LivenessStore,
    threshold: Duration,
}

impl HeartbeatMonitor {
    pub fn new(
        ledger: Arc<RegistrationLedger>,
        cache: Arc<NetworkCache>,
        heartbeats: Arc<HeartbeatCache>,
        probe: Arc<IloProbe>,
        store: LivenessStore,
        threshold: Duration,
    ) -> Self {
        Self {
            ledger,
            cache,
            heartbeats,
            probe,
            store,
            threshold,
        }
    }

    /// Judge every registered host against the responsiveness threshold.
    pub fn responsiveness_pass(&self) -> HeartbeatReport {
        let registered = self.ledger.registered_addresses();
        if registered.is_empty() {
            debug!("no registered hosts, skipping heartbeat check");
            return Vec::new();
        }

        info!(hosts = registered.len(), "running heartbeat check");
        let mut report = Vec::with_capacity(registered.len());

        for addr in registered {
            let verdict = self.judge(addr);
            match verdict {
                Responsiveness::Responsive => {
                    debug!(%addr, "host responded within threshold");
                    self.heartbeats.touch(addr);
                }
                Responsiveness::Unresponsive => {
                    warn!(%addr, threshold = ?self.threshold, "host unresponsive");
                }
                Responsiveness::Evicted => {
                    warn!(%addr, "heartbeat entry expired, host state unknown");
                }
                Responsiveness::Skipped => {
                    debug!(%addr, "blacklisted host skipped");
                }
            }
            report.push((addr, verdict));
        }

        report
    }

    fn judge(&self, addr: Ipv4Addr) -> Responsiveness {
        if self.cache.is_blacklisted(addr) {
            return Responsiveness::Skipped;
        }
        match self.heartbeats.last_update(addr) {
            None => Responsiveness::Evicted,
            Some(last) if last.elapsed() <= self.threshold => Responsiveness::Responsive,
            Some(_) => Responsiveness::Unresponsive,
        }
    }

    /// Walk the active bitmap and fold current probe agreement into the
    /// health counter: +1 towards 5 on success, -1 towards 0 on failure.
    /// `alive` (counter > 0) is republished under the bare address key.
    pub async fn health_pass(&self) -> usize {
        let bitmap = self.cache.active();
        let mut checked = 0;

        for index in bitmap.active_indexes() {
            let Some(addr) = self.cache.address_at(index) else {
                continue;
            };
            // Only hosts that completed registration carry a counter.
            if !self.store.has_health(addr).await {
                continue;
            }

            // Raw identification: the shortcut for registered hosts would
            // report success without asking the controller.
            match self.probe.identify(addr).await {
                Ok(_) => {
                    self.store.bump_health(addr).await;
                }
                Err(reason) => {
                    debug!(%addr, %reason, "health probe failed");
                    self.store.decay_health(addr).await;
                }
            }

            let alive = self.store.health(addr).await > 0;
            self.store.set_alive(addr, alive).await;
            checked += 1;
        }

        checked
    }

    /// Spawn the periodic monitor: responsiveness first, then the health
    /// pass, every tick.
    pub fn spawn(self: Arc<Self>, initial_delay: Duration, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticks.tick().await;
                self.responsiveness_pass();
                self.health_pass().await;
            }
        })
    }
}
