//! iLO Discovery & Liveness Engine
//!
//! Discovers HPE iLO baseboard management controllers on an IPv4 subnet,
//! registers each confirmed controller, keeps its liveness state current,
//! and publishes unauthenticated and authenticated snapshots onto
//! downstream message queues.
//!
//! The moving parts, leaves first:
//! - subnet enumeration and the per-scan active [`bitmap`]
//! - the HTTPS identification [`probe`] with its blacklist shortcut
//! - the periodic [`scanner`] and the [`registrar`] with its request worker
//! - the client [`registry`] and the two-cadence [`updater`]
//! - the heartbeat [`monitor`] with the per-minute health-counter pass
//!
//! [`service::DiscoveryService`] wires everything together; external
//! collaborators (message broker, key/value store, Redfish telemetry,
//! ICMP) plug in through traits with in-memory defaults.

pub mod bitmap;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod monitor;
pub mod ping;
pub mod probe;
pub mod registrar;
pub mod registry;
pub mod rimp;
pub mod scanner;
pub mod service;
pub mod store;
pub mod subnet;
pub mod updater;

// Re-export core types
pub use bitmap::Bitmap;
pub use cache::{HeartbeatCache, NetworkCache};
pub use client::{AuthenticatedClient, IloCredentials, UnauthenticatedClient};
pub use config::Config;
pub use error::{Error, ProbeFailure, Result};
pub use events::{QueuePublisher, QueueTransport, RegistrationRequest};
pub use monitor::{HeartbeatMonitor, Responsiveness};
pub use probe::IloProbe;
pub use registrar::Registrar;
pub use registry::{ClientRegistry, RegistrationLedger};
pub use rimp::RimpSummary;
pub use scanner::NetworkScanner;
pub use service::{DiscoveryService, HostState};
pub use store::{KvStore, LivenessStore, MemoryStore};
pub use subnet::SubnetRange;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default cadences and bounds for the periodic engine.
pub mod defaults {
    /// First scan fires this long after startup.
    pub const SCAN_INITIAL_DELAY_SECS: u64 = 5;

    /// Full-subnet scan cadence.
    pub const SCAN_INTERVAL_SECS: u64 = 300;

    /// First registrar pass fires this long after startup.
    pub const REGISTRAR_INITIAL_DELAY_SECS: u64 = 30;

    /// Registrar pass cadence.
    pub const REGISTRAR_INTERVAL_SECS: u64 = 30;

    /// Unauthenticated snapshot refresh cadence.
    pub const UNAUTH_UPDATE_INTERVAL_SECS: u64 = 15;

    /// Authenticated snapshot refresh cadence.
    pub const AUTH_UPDATE_INTERVAL_SECS: u64 = 5;

    /// First heartbeat-monitor tick fires this long after startup.
    pub const MONITOR_INITIAL_DELAY_SECS: u64 = 10;

    /// Heartbeat monitor cadence.
    pub const MONITOR_INTERVAL_SECS: u64 = 60;

    /// Probe connect deadline in milliseconds.
    pub const CONNECT_TIMEOUT_MS: u64 = 2000;

    /// Probe read deadline in milliseconds.
    pub const READ_TIMEOUT_MS: u64 = 1000;

    /// ICMP echo deadline for registration candidates, milliseconds.
    pub const REACHABILITY_TIMEOUT_MS: u64 = 5000;

    /// Unresponsiveness reporting threshold, milliseconds.
    pub const RESPONSIVENESS_THRESHOLD_MS: u64 = 300_000;

    /// Heartbeat entries expire this long after their last write.
    pub const HEARTBEAT_TTL_SECS: u64 = 600;

    /// Maximum number of heartbeat entries.
    pub const HEARTBEAT_CAPACITY: usize = 1000;
}
