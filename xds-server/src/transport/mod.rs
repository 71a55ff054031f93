//! Provides abstraction for transport layers.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::{DeltaDiscoveryRequest, DeltaDiscoveryResponse};

#[cfg(feature = "transport-tonic")]
pub mod tonic;

/// The inbound half of a delta discovery stream.
///
/// This abstraction allows for different transport implementations:
/// - Tonic-based gRPC transport
/// - Mock transport for testing
pub trait RequestStream: Send + 'static {
    /// Receive the next request from the proxy.
    ///
    /// Returns:
    /// - `Ok(Some(request))` - Received a request.
    /// - `Ok(None)` - Stream closed normally.
    /// - `Err(_)` - Stream error (connection dropped, malformed message, etc.)
    fn recv(&mut self) -> impl Future<Output = Result<Option<DeltaDiscoveryRequest>>> + Send;
}

/// The outbound half of a delta discovery stream.
pub trait ResponseSink: Send + 'static {
    /// Send a response to the proxy.
    fn send(&mut self, response: DeltaDiscoveryResponse) -> impl Future<Output = Result<()>> + Send;
}

/// Per-stream information available to authentication and rate limiting.
#[derive(Debug, Clone, Default)]
pub struct StreamContext {
    /// Address of the remote peer, if known.
    pub peer_addr: Option<SocketAddr>,
    /// ASCII request metadata (gRPC headers), keys lowercased.
    pub metadata: HashMap<String, String>,
    /// Cancelled when the stream ends from the outside (client gone,
    /// server shutting down).
    pub cancel: CancellationToken,
}

impl StreamContext {
    /// Create a context for a peer.
    pub fn new(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            peer_addr,
            ..Default::default()
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Peer address for logs, `0.0.0.0` when unknown.
    pub fn peer(&self) -> String {
        self.peer_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }
}
