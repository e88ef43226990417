//! Controller client snapshots and credentials
//!
//! Two snapshot flavours exist per controller: the unauthenticated view built
//! from the public identification endpoint, and the authenticated view that
//! additionally carries telemetry fetched with the default credentials. Both
//! are plain serializable data; the updater refreshes an owned copy and
//! publishes it, so no snapshot ever holds a lock or a connection.

use crate::error::{Error, Result};
use crate::probe::{fetch_identity_summary, IdentityTransport};
use crate::rimp::RimpSummary;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Minimum spacing between unauthenticated refreshes of one entry.
pub const UNAUTH_MIN_REFRESH: Duration = Duration::from_secs(10);

/// Minimum spacing between authenticated refreshes of one entry.
pub const AUTH_MIN_REFRESH: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Rolling XOR key for at-rest password masking. This is obfuscation against
/// casual exposure (debug output, heap dumps), not encryption.
const MASK_KEY: &[u8] = b"ilo-discovery-mask";

#[derive(Clone)]
enum Secret {
    Plain(String),
    Masked(Vec<u8>),
}

/// Default iLO account used for the authenticated handshake.
#[derive(Clone)]
pub struct IloCredentials {
    username: String,
    secret: Secret,
}

impl IloCredentials {
    /// Build credentials; when `obfuscate` is set the password is masked at
    /// rest and only revealed at request time.
    pub fn new(username: impl Into<String>, password: impl Into<String>, obfuscate: bool) -> Self {
        let password = password.into();
        let secret = if obfuscate {
            Secret::Masked(mask(password.as_bytes()))
        } else {
            Secret::Plain(password)
        };

        Self {
            username: username.into(),
            secret,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_obfuscated(&self) -> bool {
        matches!(self.secret, Secret::Masked(_))
    }

    /// Recover the cleartext password for an outbound request.
    pub fn reveal_password(&self) -> String {
        match &self.secret {
            Secret::Plain(password) => password.clone(),
            Secret::Masked(bytes) => String::from_utf8_lossy(&mask(bytes)).into_owned(),
        }
    }
}

impl std::fmt::Debug for IloCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IloCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// XOR is its own inverse, so one function masks and unmasks.
fn mask(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .zip(MASK_KEY.iter().cycle())
        .map(|(byte, key)| byte ^ key)
        .collect()
}

// ---------------------------------------------------------------------------
// Telemetry interface (authenticated Redfish client lives outside this crate)
// ---------------------------------------------------------------------------

/// Telemetry carried by the authenticated snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub power_state: Option<String>,
    pub overall_health: Option<String>,
    pub collected_at: Option<DateTime<Utc>>,
}

/// Opaque "fetch latest telemetry" call backed by the authenticated iLO API.
///
/// The real Redfish client is an external collaborator; this trait is the
/// seam it plugs into.
#[async_trait]
pub trait TelemetryFetch: Send + Sync {
    async fn fetch(
        &self,
        addr: Ipv4Addr,
        credentials: &IloCredentials,
    ) -> Result<TelemetrySnapshot>;
}

/// Stand-in telemetry source that answers with an empty snapshot. Used by
/// default wiring until the authenticated client is supplied.
pub struct NullTelemetryFetch;

#[async_trait]
impl TelemetryFetch for NullTelemetryFetch {
    async fn fetch(
        &self,
        _addr: Ipv4Addr,
        _credentials: &IloCredentials,
    ) -> Result<TelemetrySnapshot> {
        Ok(TelemetrySnapshot {
            collected_at: Some(Utc::now()),
            ..TelemetrySnapshot::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Unauthenticated client
// ---------------------------------------------------------------------------

/// Snapshot of one controller built from the public identification endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnauthenticatedClient {
    /// Registry key; the UUID parsed out of the identification document.
    pub ilo_uuid: String,
    pub address: Ipv4Addr,
    pub serial_number: Option<String>,
    pub product_name: Option<String>,
    pub firmware: Option<String>,
    pub management_processor: Option<String>,
    pub last_refreshed: DateTime<Utc>,
    pub update_failures: u32,
}

impl UnauthenticatedClient {
    pub fn from_summary(addr: Ipv4Addr, summary: &RimpSummary) -> Self {
        Self {
            ilo_uuid: summary.uuid.clone(),
            address: addr,
            serial_number: summary.serial_number.clone(),
            product_name: summary.product_name.clone(),
            firmware: summary.firmware.clone(),
            management_processor: summary.management_processor.clone(),
            last_refreshed: Utc::now(),
            update_failures: 0,
        }
    }

    /// Update gate: refuse refreshes that would land closer together than
    /// [`UNAUTH_MIN_REFRESH`].
    pub fn can_update(&self, now: DateTime<Utc>) -> bool {
        can_refresh(self.last_refreshed, now, UNAUTH_MIN_REFRESH)
    }

    /// Re-fetch the identification document and fold it in. The registry key
    /// never changes on refresh.
    pub async fn update(&mut self, transport: &dyn IdentityTransport) -> Result<()> {
        match fetch_identity_summary(transport, self.address).await {
            Ok(summary) => {
                self.serial_number = summary.serial_number;
                self.product_name = summary.product_name;
                self.firmware = summary.firmware;
                self.management_processor = summary.management_processor;
                self.last_refreshed = Utc::now();
                self.update_failures = 0;
                Ok(())
            }
            Err(reason) => {
                self.update_failures += 1;
                Err(Error::SnapshotBuild {
                    addr: self.address,
                    message: reason.to_string(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Authenticated client
// ---------------------------------------------------------------------------

/// Snapshot of one controller enriched through the authenticated API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedClient {
    pub ilo_uuid: String,
    pub address: Ipv4Addr,
    /// Account the snapshot was collected with; the password never leaves
    /// the process.
    pub username: String,
    #[serde(skip)]
    credentials: Option<IloCredentials>,
    pub serial_number: Option<String>,
    pub product_name: Option<String>,
    pub telemetry: TelemetrySnapshot,
    pub last_refreshed: DateTime<Utc>,
    pub update_failures: u32,
}

impl AuthenticatedClient {
    /// Perform the auth handshake: one telemetry fetch with the default
    /// credentials. Failure leaves the host registered with only its
    /// unauthenticated snapshot.
    pub async fn connect(
        credentials: IloCredentials,
        unauthenticated: &UnauthenticatedClient,
        telemetry: &dyn TelemetryFetch,
    ) -> Result<Self> {
        let addr = unauthenticated.address;
        let snapshot = telemetry
            .fetch(addr, &credentials)
            .await
            .map_err(|e| Error::AuthHandshake {
                addr,
                message: e.to_string(),
            })?;

        Ok(Self {
            ilo_uuid: unauthenticated.ilo_uuid.clone(),
            address: addr,
            username: credentials.username().to_string(),
            credentials: Some(credentials),
            serial_number: unauthenticated.serial_number.clone(),
            product_name: unauthenticated.product_name.clone(),
            telemetry: snapshot,
            last_refreshed: Utc::now(),
            update_failures: 0,
        })
    }

    pub fn can_update(&self, now: DateTime<Utc>) -> bool {
        // A deserialized snapshot has no credentials and cannot refresh.
        self.credentials.is_some() && can_refresh(self.last_refreshed, now, AUTH_MIN_REFRESH)
    }

    pub async fn update(&mut self, telemetry: &dyn TelemetryFetch) -> Result<()> {
        let credentials = self.credentials.as_ref().ok_or_else(|| Error::AuthHandshake {
            addr: self.address,
            message: "snapshot carries no credentials".to_string(),
        })?;

        match telemetry.fetch(self.address, credentials).await {
            Ok(snapshot) => {
                self.telemetry = snapshot;
                self.last_refreshed = Utc::now();
                self.update_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.update_failures += 1;
                Err(Error::AuthHandshake {
                    addr: self.address,
                    message: e.to_string(),
                })
            }
        }
    }
}

fn can_refresh(last: DateTime<Utc>, now: DateTime<Utc>, spacing: Duration) -> bool {
    match (now - last).to_std() {
        Ok(elapsed) => elapsed >= spacing,
        // `now` earlier than `last` means clock skew; allow the refresh.
        Err(_) => true,
    }
}
