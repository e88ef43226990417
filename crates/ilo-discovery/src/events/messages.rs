//! Queue message payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Request to register a newly discovered controller.
///
/// The hint names the discovery origin the way downstream tooling expects:
/// `Discovery-` followed by the address with its dots stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub ilo_address: Ipv4Addr,
    pub client_hint: String,
    pub requested_at: DateTime<Utc>,
}

impl RegistrationRequest {
    pub fn new(ilo_address: Ipv4Addr) -> Self {
        Self {
            ilo_address,
            client_hint: format!("Discovery-{}", ilo_address.to_string().replace('.', "")),
            requested_at: Utc::now(),
        }
    }
}
