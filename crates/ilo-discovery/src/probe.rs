//! iLO identification probe
//!
//! Decides whether a candidate address is a live iLO controller. The probe
//! consults the blacklist and registration set before spending any network
//! I/O, then fetches `https://<addr>/xmldata?item=all` and validates the
//! RIMP document. Management interfaces ship self-signed certificates, so
//! the HTTP client is built to accept any chain and any hostname, as an
//! explicit per-client setting rather than process-global TLS state.

use crate::cache::NetworkCache;
use crate::error::{Error, ProbeFailure, Result};
use crate::registry::RegistrationLedger;
use crate::rimp::{parse_rimp, RimpSummary};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Identification endpoint, templated over the candidate address.
const ILO_ENDPOINT_TEMPLATE: &str = "https://{addr}/xmldata?item=all";

/// Raw response of one identification fetch.
#[derive(Debug, Clone)]
pub struct IdentityResponse {
    pub status: u16,
    pub body: String,
}

/// Transport that fetches the identification document for an address.
///
/// The HTTPS implementation is the production path; tests script responses
/// through [`StaticIdentityTransport`].
#[async_trait]
pub trait IdentityTransport: Send + Sync {
    async fn fetch(&self, addr: Ipv4Addr) -> std::result::Result<IdentityResponse, ProbeFailure>;
}

// ---------------------------------------------------------------------------
// HTTPS transport
// ---------------------------------------------------------------------------

/// HTTPS transport with trust-all TLS and bounded connect/read deadlines.
pub struct HttpIdentityTransport {
    client: reqwest::Client,
    endpoint_template: String,
}

impl HttpIdentityTransport {
    /// Build the transport. Failing to construct the trust-all TLS client is
    /// fatal at boot.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        Self::with_endpoint_template(connect_timeout, read_timeout, ILO_ENDPOINT_TEMPLATE)
    }

    /// As [`Self::new`] with a custom endpoint template (`{addr}` expands to
    /// the candidate address). Lets tests point the transport at a local
    /// server.
    pub fn with_endpoint_template(
        connect_timeout: Duration,
        read_timeout: Duration,
        template: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| Error::ProbeFailed {
                addr: Ipv4Addr::UNSPECIFIED,
                reason: ProbeFailure::TlsInit(e.to_string()),
            })?;

        Ok(Self {
            client,
            endpoint_template: template.into(),
        })
    }

    fn endpoint_for(&self, addr: Ipv4Addr) -> String {
        self.endpoint_template.replace("{addr}", &addr.to_string())
    }

    fn map_request_error(e: reqwest::Error) -> ProbeFailure {
        if e.is_timeout() {
            ProbeFailure::Timeout { connect: e.is_connect() }
        } else if e.is_connect() {
            ProbeFailure::Transport(format!("connect failed: {e}"))
        } else {
            ProbeFailure::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl IdentityTransport for HttpIdentityTransport {
    async fn fetch(&self, addr: Ipv4Addr) -> std::result::Result<IdentityResponse, ProbeFailure> {
        let response = self
            .client
            .get(self.endpoint_for(addr))
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(Self::map_request_error)?;

        Ok(IdentityResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Scripted transport for tests
// ---------------------------------------------------------------------------

/// Canned per-address responses, for engine tests.
///
/// Addresses without an entry behave like silent hosts (connect timeout).
/// The transport counts fetches so tests can assert on probe purity.
#[derive(Default)]
pub struct StaticIdentityTransport {
    responses: RwLock<HashMap<Ipv4Addr, std::result::Result<IdentityResponse, ProbeFailure>>>,
    fetch_count: AtomicUsize,
}

impl StaticIdentityTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a 200 response with the given body.
    pub fn respond_ok(&self, addr: Ipv4Addr, body: impl Into<String>) {
        self.respond_status(addr, 200, body);
    }

    pub fn respond_status(&self, addr: Ipv4Addr, status: u16, body: impl Into<String>) {
        self.responses
            .write()
            .insert(addr, Ok(IdentityResponse { status, body: body.into() }));
    }

    pub fn respond_error(&self, addr: Ipv4Addr, failure: ProbeFailure) {
        self.responses.write().insert(addr, Err(failure));
    }

    /// Forget the script for an address; it reverts to connect-timeout.
    pub fn go_silent(&self, addr: Ipv4Addr) {
        self.responses.write().remove(&addr);
    }

    /// Number of fetches performed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityTransport for StaticIdentityTransport {
    async fn fetch(&self, addr: Ipv4Addr) -> std::result::Result<IdentityResponse, ProbeFailure> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.responses
            .read()
            .get(&addr)
            .cloned()
            .unwrap_or(Err(ProbeFailure::Timeout { connect: true }))
    }
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// Fetch and validate one identification document, with no cache side
/// effects. Shared by the probe, the registration worker and snapshot
/// refreshes.
pub async fn fetch_identity_summary(
    transport: &dyn IdentityTransport,
    addr: Ipv4Addr,
) -> std::result::Result<RimpSummary, ProbeFailure> {
    let response = transport.fetch(addr).await?;

    if response.status != 200 {
        return Err(ProbeFailure::NonOk(response.status));
    }

    parse_rimp(&response.body, addr).map_err(ProbeFailure::BadBody)
}

/// The identification probe.
///
/// Side-effectful only on the blacklist; it never mutates the registration
/// set.
pub struct IloProbe {
    transport: Arc<dyn IdentityTransport>,
    cache: Arc<NetworkCache>,
    ledger: Arc<RegistrationLedger>,
}

impl IloProbe {
    pub fn new(
        transport: Arc<dyn IdentityTransport>,
        cache: Arc<NetworkCache>,
        ledger: Arc<RegistrationLedger>,
    ) -> Self {
        Self {
            transport,
            cache,
            ledger,
        }
    }

    pub fn transport(&self) -> Arc<dyn IdentityTransport> {
        self.transport.clone()
    }

    /// Classify one candidate address.
    ///
    /// Blacklisted addresses answer `false` and registered addresses `true`,
    /// both without network I/O. Everything else is fetched and validated;
    /// any failure blacklists the address.
    pub async fn is_ilo(&self, addr: Ipv4Addr) -> bool {
        if self.cache.is_blacklisted(addr) {
            debug!(%addr, "skipping blacklisted address");
            return false;
        }
        if self.ledger.is_registered(addr) {
            debug!(%addr, "address already registered");
            return true;
        }

        match self.identify(addr).await {
            Ok(_) => true,
            Err(reason) => {
                if reason.is_connect_timeout() {
                    // The expected common case on sparse subnets.
                    debug!(%addr, "no answer from address");
                } else {
                    info!(%addr, %reason, "address is not an iLO controller");
                }
                self.cache.blacklist(addr);
                false
            }
        }
    }

    /// Raw identification: fetch + validate, no shortcuts and no blacklist
    /// mutation. The health pass uses this to measure probe agreement for
    /// hosts that are already registered.
    pub async fn identify(&self, addr: Ipv4Addr) -> std::result::Result<RimpSummary, ProbeFailure> {
        fetch_identity_summary(self.transport.as_ref(), addr).await
    }

    /// Identification for the registration path; failures surface as
    /// [`Error::SnapshotBuild`] and leave the blacklist untouched.
    pub async fn fetch_summary(&self, addr: Ipv4Addr) -> Result<RimpSummary> {
        self.identify(addr).await.map_err(|reason| Error::SnapshotBuild {
            addr,
            message: reason.to_string(),
        })
    }
}
