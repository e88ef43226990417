//! Queue publisher
//!
//! Serializes payloads, optionally gzip-frames them, and hands them to the
//! transport. Publish failures are error-logged and counted but never
//! retried in-line; the next cadence produces a fresh snapshot anyway.

use super::{QueueTransport, AUTHENTICATED_CLIENT_QUEUE, UNAUTHENTICATED_CLIENT_QUEUE};
use crate::client::{AuthenticatedClient, UnauthenticatedClient};
use crate::error::{Error, Result};
use crate::events::{RegistrationRequest, NEW_CLIENT_REQUEST_QUEUE};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use serde::Serialize;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, error};

/// Leading bytes of a gzip stream; consumers sniff these to accept framed
/// and unframed bodies alike.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Publish counters, exposed for the health surface.
#[derive(Debug, Default, Clone)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
}

/// Serializing publisher over a [`QueueTransport`].
pub struct QueuePublisher {
    transport: Arc<dyn QueueTransport>,
    /// Producer framing choice; consumers accept either form.
    gzip_frame: bool,
    stats: RwLock<PublisherStats>,
}

impl QueuePublisher {
    pub fn new(transport: Arc<dyn QueueTransport>, gzip_frame: bool) -> Self {
        Self {
            transport,
            gzip_frame,
            stats: RwLock::new(PublisherStats::default()),
        }
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats.read().clone()
    }

    /// Serialize and publish one payload.
    pub async fn publish<T: Serialize>(&self, queue: &str, payload: &T) -> Result<()> {
        let body = self.encode(payload).map_err(|e| Error::QueuePublish {
            queue: queue.to_string(),
            message: e.to_string(),
        })?;

        match self.transport.publish(queue, &body).await {
            Ok(()) => {
                self.stats.write().published += 1;
                debug!(queue, bytes = body.len(), "published message");
                Ok(())
            }
            Err(e) => {
                self.stats.write().failed += 1;
                error!(queue, %e, "queue publish failed");
                Err(Error::QueuePublish {
                    queue: queue.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn encode<T: Serialize>(&self, payload: &T) -> std::io::Result<Vec<u8>> {
        let json = serde_json::to_vec(payload)?;
        if !self.gzip_frame {
            return Ok(json);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()
    }

    // ------------------------------------------------------------------
    // Convenience methods for the engine's three feeds
    // ------------------------------------------------------------------

    pub async fn registration_requested(&self, request: &RegistrationRequest) -> Result<()> {
        self.publish(NEW_CLIENT_REQUEST_QUEUE, request).await
    }

    pub async fn unauthenticated_snapshot(&self, client: &UnauthenticatedClient) -> Result<()> {
        self.publish(UNAUTHENTICATED_CLIENT_QUEUE, client).await
    }

    pub async fn authenticated_snapshot(&self, client: &AuthenticatedClient) -> Result<()> {
        self.publish(AUTHENTICATED_CLIENT_QUEUE, client).await
    }
}

/// Consumer-side body decoding: gunzip when the gzip magic is present,
/// pass through otherwise.
pub fn decode_frame(body: &[u8]) -> std::io::Result<Vec<u8>> {
    if body.len() >= 2 && body[..2] == GZIP_MAGIC {
        let mut decoder = GzDecoder::new(body);
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded)?;
        Ok(decoded)
    } else {
        Ok(body.to_vec())
    }
}
