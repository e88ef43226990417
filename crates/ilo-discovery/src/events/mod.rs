//! Queue publishing for discovery events
//!
//! Three named queues on a topic-style broker carry the engine's output:
//! registration requests and the two snapshot feeds. The broker driver is an
//! external collaborator behind [`QueueTransport`]; [`InMemoryTransport`] is
//! the in-process implementation used by default wiring and tests.

mod messages;
mod publisher;

pub use messages::RegistrationRequest;
pub use publisher::{decode_frame, PublisherStats, QueuePublisher};

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Queue fed by the registrar with serialized [`RegistrationRequest`]s.
pub const NEW_CLIENT_REQUEST_QUEUE: &str = "newClientRequestQueue";

/// Queue carrying unauthenticated snapshot updates.
pub const UNAUTHENTICATED_CLIENT_QUEUE: &str = "unauthenticatedIloClientQueue";

/// Queue carrying authenticated snapshot updates.
pub const AUTHENTICATED_CLIENT_QUEUE: &str = "authenticatedIloClientQueue";

/// All queues the engine produces onto.
pub fn all_queues() -> &'static [&'static str] {
    &[
        NEW_CLIENT_REQUEST_QUEUE,
        UNAUTHENTICATED_CLIENT_QUEUE,
        AUTHENTICATED_CLIENT_QUEUE,
    ]
}

/// Transport backend for queue publishes.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Publish one message body onto a named queue.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()>;

    /// Whether the transport currently has a broker connection.
    fn is_connected(&self) -> bool;
}

/// Simple in-memory transport for testing and default wiring.
pub struct InMemoryTransport {
    connected: AtomicBool,
    messages: RwLock<Vec<(String, Vec<u8>)>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            messages: RwLock::new(Vec::new()),
        }
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Every message published so far, in publish order.
    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.read().clone()
    }

    /// Bodies published onto one queue.
    pub fn bodies_for(&self, queue: &str) -> Vec<Vec<u8>> {
        self.messages
            .read()
            .iter()
            .filter(|(name, _)| name == queue)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.messages.write().clear();
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::QueuePublish {
                queue: queue.to_string(),
                message: "transport not connected".to_string(),
            });
        }
        self.messages
            .write()
            .push((queue.to_string(), body.to_vec()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
