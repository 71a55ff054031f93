//! Per-connection subscription state for one resource type.

use std::collections::BTreeSet;

use tokio::time::Instant;

/// What one connection has subscribed to for one type URL, and where the
/// ACK/NACK exchange for that type stands.
#[derive(Debug, Clone, Default)]
pub struct WatchedResource {
    /// The type URL this record tracks.
    pub type_url: String,
    /// Explicitly subscribed resource names. Empty together with `wildcard`
    /// means "everything".
    pub resource_names: BTreeSet<String>,
    /// The connection asked for every resource of this type.
    pub wildcard: bool,
    /// Nonce of the most recent response sent for this type.
    pub nonce_sent: String,
    /// Nonce of the most recent response the client acknowledged.
    pub nonce_acked: String,
    /// Message of the most recent NACK, cleared on the next ACK.
    pub last_error: Option<String>,
    /// One-shot flag forcing a response to the next request regardless of
    /// subscription changes. Reset when consumed.
    pub always_respond: bool,
    /// When the most recent response for this type was written.
    pub last_send_time: Option<Instant>,
}

impl WatchedResource {
    /// Create an empty record for `type_url`.
    pub fn new(type_url: impl Into<String>) -> Self {
        Self {
            type_url: type_url.into(),
            ..Default::default()
        }
    }

    /// Set the subscribed names.
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the record as a wildcard subscription.
    pub fn with_wildcard(mut self, wildcard: bool) -> Self {
        self.wildcard = wildcard;
        self
    }

    /// Returns true if the most recent response has not been acknowledged.
    pub fn has_pending_nonce(&self) -> bool {
        !self.nonce_sent.is_empty() && self.nonce_sent != self.nonce_acked
    }
}
