//! ICMP reachability checks
//!
//! Registration gates on an ICMP echo so that a host which answered one
//! HTTPS probe but has since gone away is not registered. ICMP needs raw or
//! dgram sockets, so the check sits behind a trait; environments without the
//! privilege (and tests) plug in [`StaticReachability`].

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::debug;

/// Reachability check for registration candidates.
#[async_trait]
pub trait Reachability: Send + Sync {
    /// `true` when the host answered an echo within `timeout`.
    async fn is_reachable(&self, addr: Ipv4Addr, timeout: Duration) -> bool;
}

/// ICMP echo via `surge-ping`.
pub struct IcmpPinger;

#[async_trait]
impl Reachability for IcmpPinger {
    async fn is_reachable(&self, addr: Ipv4Addr, timeout: Duration) -> bool {
        let payload = [0u8; 8];
        match tokio::time::timeout(timeout, surge_ping::ping(IpAddr::V4(addr), &payload)).await {
            Ok(Ok((_packet, rtt))) => {
                debug!(%addr, ?rtt, "host answered echo");
                true
            }
            Ok(Err(e)) => {
                debug!(%addr, %e, "echo failed");
                false
            }
            Err(_) => {
                debug!(%addr, "echo timed out");
                false
            }
        }
    }
}

/// Fixed-answer reachability for tests and unprivileged deployments.
pub struct StaticReachability {
    reachable: bool,
}

impl StaticReachability {
    pub fn reachable() -> Self {
        Self { reachable: true }
    }

    pub fn unreachable() -> Self {
        Self { reachable: false }
    }
}

#[async_trait]
impl Reachability for StaticReachability {
    async fn is_reachable(&self, _addr: Ipv4Addr, _timeout: Duration) -> bool {
        self.reachable
    }
}
