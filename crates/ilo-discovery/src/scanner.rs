//! Periodic network scanner
//!
//! Walks the cached address range with a bounded fan-out of identification
//! probes and publishes the result as one complete bitmap. Scans never
//! overlap: a tick that fires while the previous sweep is still running is
//! skipped.

use crate::bitmap::Bitmap;
use crate::cache::NetworkCache;
use crate::probe::IloProbe;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub struct NetworkScanner {
    probe: Arc<IloProbe>,
    cache: Arc<NetworkCache>,
    /// Probe fan-out width: the subnet prefix length, a proxy for the log of
    /// the address-space size (a /24 scans 24-wide).
    concurrency: usize,
    scanning: AtomicBool,
}

impl NetworkScanner {
    pub fn new(probe: Arc<IloProbe>, cache: Arc<NetworkCache>) -> Self {
        let concurrency = usize::from(cache.range().prefix_len()).max(1);
        Self {
            probe,
            cache,
            concurrency,
            scanning: AtomicBool::new(false),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run one sweep unless a previous sweep is still in progress.
    ///
    /// Returns the published bitmap, or `None` when the tick was skipped.
    pub async fn try_scan(&self) -> Option<Arc<Bitmap>> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("previous scan still running, skipping tick");
            return None;
        }

        let bitmap = self.scan().await;
        self.scanning.store(false, Ordering::SeqCst);
        Some(bitmap)
    }

    /// The sweep itself: probe every candidate, collect hits into a fresh
    /// bitmap, swap it in whole. Individual probe outcomes never abort the
    /// sweep.
    async fn scan(&self) -> Arc<Bitmap> {
        let addresses = self.cache.addresses();
        info!(
            count = addresses.len(),
            width = self.concurrency,
            "scanning subnet for controllers"
        );

        let hits: Vec<(usize, bool)> = stream::iter(addresses.iter().copied().enumerate())
            .map(|(index, addr)| {
                let probe = self.probe.clone();
                async move { (index, probe.is_ilo(addr).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut bitmap = Bitmap::new(addresses.len());
        for (index, is_ilo) in hits {
            if is_ilo {
                bitmap.set(index);
            }
        }

        info!(active = bitmap.count_set(), "scan complete");
        self.cache.replace_active(bitmap)
    }

    /// Spawn the periodic scan loop.
    pub fn spawn(self: Arc<Self>, initial_delay: Duration, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticks.tick().await;
                self.try_scan().await;
            }
        })
    }
}
