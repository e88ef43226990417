//! Error types for the discovery engine

use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// Result type for discovery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Discovery engine errors
#[derive(Debug, Error)]
pub enum Error {
    // Boot-time errors (fatal)
    #[error("invalid network configuration: {0}")]
    InvalidNetworkConfig(String),

    // Per-host errors (swallowed by the owning tick)
    #[error("probe of {addr} failed: {reason}")]
    ProbeFailed { addr: Ipv4Addr, reason: ProbeFailure },

    #[error("host {0} did not answer ICMP echo within {1:?}")]
    Unreachable(Ipv4Addr, Duration),

    #[error("snapshot build for {addr} failed: {message}")]
    SnapshotBuild { addr: Ipv4Addr, message: String },

    #[error("auth handshake with {addr} failed: {message}")]
    AuthHandshake { addr: Ipv4Addr, message: String },

    // Infrastructure errors
    #[error("key/value store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("publish to queue '{queue}' failed: {message}")]
    QueuePublish { queue: String, message: String },

    // Ambient errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Per-host errors are contained by the tick that raised them; anything
    /// else should surface to the caller.
    pub fn is_per_host(&self) -> bool {
        matches!(
            self,
            Error::ProbeFailed { .. }
                | Error::Unreachable(..)
                | Error::SnapshotBuild { .. }
                | Error::AuthHandshake { .. }
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Why a single identification probe failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// Request deadline exceeded; `connect` is set when the TCP connect
    /// itself timed out (the common case on sparse subnets).
    Timeout { connect: bool },

    /// Endpoint answered with a non-200 status.
    NonOk(u16),

    /// Body did not start with `<RIMP>` or failed XML validation.
    BadBody(String),

    /// The trust-all TLS client could not be constructed. Fatal at boot.
    TlsInit(String),

    /// Any other transport-level failure.
    Transport(String),
}

impl ProbeFailure {
    /// Connect timeouts are routine on subnets full of silent addresses and
    /// are kept out of the info/error log path.
    pub fn is_connect_timeout(&self) -> bool {
        matches!(self, ProbeFailure::Timeout { connect: true })
    }
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::Timeout { connect: true } => write!(f, "connect timed out"),
            ProbeFailure::Timeout { connect: false } => write!(f, "read timed out"),
            ProbeFailure::NonOk(status) => write!(f, "non-OK response status {status}"),
            ProbeFailure::BadBody(msg) => write!(f, "invalid identification body: {msg}"),
            ProbeFailure::TlsInit(msg) => write!(f, "TLS client construction failed: {msg}"),
            ProbeFailure::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_host_classification() {
        let e = Error::ProbeFailed {
            addr: Ipv4Addr::new(10, 0, 0, 1),
            reason: ProbeFailure::NonOk(404),
        };
        assert!(e.is_per_host());

        let e = Error::InvalidNetworkConfig("bad mask".into());
        assert!(!e.is_per_host());

        let e = Error::QueuePublish {
            queue: "q".into(),
            message: "down".into(),
        };
        assert!(!e.is_per_host());
    }

    #[test]
    fn test_connect_timeout_is_quiet() {
        assert!(ProbeFailure::Timeout { connect: true }.is_connect_timeout());
        assert!(!ProbeFailure::Timeout { connect: false }.is_connect_timeout());
        assert!(!ProbeFailure::NonOk(500).is_connect_timeout());
    }
}
