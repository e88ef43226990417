//! RIMP identification document parsing
//!
//! iLO controllers answer `GET /xmldata?item=all` with an unauthenticated XML
//! summary rooted at `RIMP`. A response identifies an iLO iff it starts with
//! the literal `<RIMP>` and parses as XML with that root element. roxmltree
//! never resolves external entities, which is exactly the parsing posture the
//! probe needs.

use std::net::Ipv4Addr;
use uuid::Uuid;

/// Leading byte sequence of a genuine identification body.
pub const RIMP_PREFIX: &str = "<RIMP>";

/// Fields extracted from one identification document.
///
/// Everything except the UUID is optional: older iLO generations omit
/// individual elements, and a thin document is still a valid controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RimpSummary {
    /// Controller identity used to key the client registries.
    pub uuid: String,
    pub serial_number: Option<String>,
    pub product_name: Option<String>,
    /// iLO firmware revision (`MP/FWRI`).
    pub firmware: Option<String>,
    /// Management processor model (`MP/PN`), e.g. "Integrated Lights-Out 4 (iLO 4)".
    pub management_processor: Option<String>,
}

/// Cheap pre-check before spending a full XML parse on the body.
pub fn looks_like_rimp(body: &str) -> bool {
    body.starts_with(RIMP_PREFIX)
}

/// Parse and validate an identification body.
///
/// Returns a human-readable reason on rejection; callers fold that into
/// their probe-failure reporting.
pub fn parse_rimp(body: &str, addr: Ipv4Addr) -> Result<RimpSummary, String> {
    if !looks_like_rimp(body) {
        return Err("body does not start with <RIMP>".to_string());
    }

    let document = roxmltree::Document::parse(body).map_err(|e| format!("XML parse: {e}"))?;

    let root = document.root_element();
    if root.tag_name().name() != "RIMP" {
        return Err(format!("unexpected root element '{}'", root.tag_name().name()));
    }

    let text_of = |tag: &str| -> Option<String> {
        document
            .descendants()
            .find(|node| node.has_tag_name(tag))
            .and_then(|node| node.text())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };

    let serial_number = text_of("SBSN");

    Ok(RimpSummary {
        uuid: derive_uuid(&text_of("cUUID"), &text_of("UUID"), &serial_number, addr),
        serial_number,
        product_name: text_of("SPN"),
        firmware: text_of("FWRI"),
        management_processor: text_of("PN"),
    })
}

/// The parsed UUID is the authoritative registry key. Fall back through the
/// plain UUID element, then the chassis serial, then a generated identity so
/// a sparse document still registers under a stable-enough key.
fn derive_uuid(
    cuuid: &Option<String>,
    uuid: &Option<String>,
    serial: &Option<String>,
    addr: Ipv4Addr,
) -> String {
    if let Some(id) = cuuid.as_deref().or(uuid.as_deref()) {
        return id.to_string();
    }
    if let Some(serial) = serial {
        return format!("{serial}-{addr}");
    }
    Uuid::new_v4().to_string()
}
