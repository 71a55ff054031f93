//! Push requests and the events that carry them to connections.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;

/// A computed configuration snapshot, identified by its version.
///
/// Generators read their actual state elsewhere; the context only pins the
/// version every response of one push cycle is labelled with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushContext {
    /// Version of the snapshot, used as `system_version_info` and nonce prefix.
    pub push_version: String,
}

impl PushContext {
    /// Create a context for the given snapshot version.
    pub fn new(push_version: impl Into<String>) -> Self {
        Self {
            push_version: push_version.into(),
        }
    }
}

/// Why a push was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerReason {
    /// Endpoints of a service changed.
    EndpointUpdate,
    /// A configuration object changed.
    ConfigUpdate,
    /// A service definition changed.
    ServiceUpdate,
    /// Proxy metadata changed.
    ProxyUpdate,
    /// Everything must be recomputed.
    GlobalUpdate,
    /// A proxy asked for resources.
    ProxyRequest,
    /// Pushed because a resource it depends on was pushed.
    DependentResource,
    /// Requested through a debug type.
    Debug,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerReason::EndpointUpdate => "endpoint",
            TriggerReason::ConfigUpdate => "config",
            TriggerReason::ServiceUpdate => "service",
            TriggerReason::ProxyUpdate => "proxy",
            TriggerReason::GlobalUpdate => "global",
            TriggerReason::ProxyRequest => "proxyrequest",
            TriggerReason::DependentResource => "dependentresource",
            TriggerReason::Debug => "debug",
        };
        f.write_str(s)
    }
}

/// Trigger reasons of a push with how often each occurred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasonStats(BTreeMap<TriggerReason, usize>);

impl ReasonStats {
    /// Stats holding a single occurrence of `reason`.
    pub fn new(reason: TriggerReason) -> Self {
        let mut stats = Self::default();
        stats.add(reason);
        stats
    }

    /// Record one more occurrence of `reason`.
    pub fn add(&mut self, reason: TriggerReason) {
        *self.0.entry(reason).or_default() += 1;
    }

    /// How often `reason` was recorded.
    pub fn count(&self, reason: TriggerReason) -> usize {
        self.0.get(&reason).copied().unwrap_or_default()
    }

    /// Returns true if `reason` is the only recorded reason.
    pub fn is_only(&self, reason: TriggerReason) -> bool {
        self.0.len() == 1 && self.0.contains_key(&reason)
    }
}

impl fmt::Display for ReasonStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (reason, count) in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{reason}:{count}")?;
        }
        Ok(())
    }
}

/// Identifies one configuration object that changed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigKey {
    /// Type URL of the resources derived from the object.
    pub type_url: String,
    /// Name of the object.
    pub name: String,
}

impl ConfigKey {
    /// Create a config key.
    pub fn new(type_url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_url: type_url.into(),
            name: name.into(),
        }
    }
}

/// The subscription change that caused a request-triggered push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDelta {
    /// Names the client subscribed to.
    pub subscribed: BTreeSet<String>,
    /// Names the client unsubscribed from.
    pub unsubscribed: BTreeSet<String>,
}

impl ResourceDelta {
    /// Returns true if the delta names nothing.
    pub fn is_empty(&self) -> bool {
        self.subscribed.is_empty() && self.unsubscribed.is_empty()
    }
}

/// Describes why a push is happening and what it covers.
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Full resync: generators recompute everything they serve.
    pub full: bool,
    /// The snapshot this push is computed from.
    pub push: Arc<PushContext>,
    /// Why the push was triggered.
    pub reason: ReasonStats,
    /// When the push was triggered.
    pub start: Instant,
    /// Push even if nothing appears to have changed for the proxy.
    pub forced: bool,
    /// Objects that changed. Empty on a full push means "anything may have".
    pub configs_updated: BTreeSet<ConfigKey>,
    /// For request-triggered pushes, the subscription change being answered.
    pub delta: ResourceDelta,
}

impl PushRequest {
    /// A full push of `push` for `reason`.
    pub fn full(push: Arc<PushContext>, reason: TriggerReason) -> Self {
        Self {
            full: true,
            push,
            reason: ReasonStats::new(reason),
            start: Instant::now(),
            forced: false,
            configs_updated: BTreeSet::new(),
            delta: ResourceDelta::default(),
        }
    }

    /// An incremental push of `push` for `reason`.
    pub fn incremental(push: Arc<PushContext>, reason: TriggerReason) -> Self {
        Self {
            full: false,
            ..Self::full(push, reason)
        }
    }

    /// Mark the push as forced.
    pub fn with_forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    /// Record a changed configuration object.
    pub fn with_config_updated(mut self, key: ConfigKey) -> Self {
        self.configs_updated.insert(key);
        self
    }

    /// Attach the subscription change this push answers.
    pub fn with_delta(mut self, delta: ResourceDelta) -> Self {
        self.delta = delta;
        self
    }

    /// Override the start instant.
    pub fn with_start(mut self, start: Instant) -> Self {
        self.start = start;
        self
    }

    /// Returns true if this push answers a proxy request.
    pub fn is_request(&self) -> bool {
        self.reason.is_only(TriggerReason::ProxyRequest)
    }

    /// Suffix used in push logs.
    pub(crate) fn push_reason(&self) -> &'static str {
        if self.is_request() { " request" } else { "" }
    }
}

/// Signals the producer of an [`Event`] that the event was processed.
///
/// The signal is sent when this value is dropped, so a connection that fails
/// mid-push still releases the producer.
#[derive(Debug)]
pub struct ProcessingDone(Option<oneshot::Sender<()>>);

impl ProcessingDone {
    /// Create a handle and the receiver that resolves when it is dropped.
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }
}

impl Drop for ProcessingDone {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// A push delivered to one connection.
#[derive(Debug)]
pub struct Event {
    /// The push to perform.
    pub push_request: Arc<PushRequest>,
    /// Completion handle, dropped once the push was handled.
    pub done: ProcessingDone,
}

impl Event {
    /// Create an event and the receiver that resolves once it was handled.
    pub fn new(push_request: Arc<PushRequest>) -> (Self, oneshot::Receiver<()>) {
        let (done, rx) = ProcessingDone::channel();
        (Self { push_request, done }, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_stats() {
        let mut stats = ReasonStats::new(TriggerReason::ConfigUpdate);
        stats.add(TriggerReason::EndpointUpdate);
        stats.add(TriggerReason::ConfigUpdate);
        assert_eq!(stats.count(TriggerReason::ConfigUpdate), 2);
        assert_eq!(stats.count(TriggerReason::Debug), 0);
        assert!(!stats.is_only(TriggerReason::ConfigUpdate));
        assert_eq!(stats.to_string(), "endpoint:1 config:2");
    }

    #[test]
    fn test_push_reason() {
        let push = Arc::new(PushContext::new("v1"));
        let request = PushRequest::full(push.clone(), TriggerReason::ProxyRequest);
        assert!(request.is_request());
        assert_eq!(request.push_reason(), " request");

        let request = PushRequest::incremental(push, TriggerReason::EndpointUpdate);
        assert!(!request.full);
        assert_eq!(request.push_reason(), "");
    }

    #[tokio::test]
    async fn test_processing_done_signals_on_drop() {
        let (event, rx) = Event::new(Arc::new(PushRequest::full(
            Arc::new(PushContext::default()),
            TriggerReason::GlobalUpdate,
        )));
        drop(event);
        assert!(rx.await.is_ok());
    }
}
