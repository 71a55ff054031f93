//! The server-side view of one connected proxy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::message::Node;
use crate::model::push::PushContext;
use crate::model::types::PUSH_ORDER;
use crate::model::watched::WatchedResource;

/// The logical identity of one remote proxy and its subscription registry.
///
/// All mutable state sits behind one lock. The registry is only mutated by
/// the proxy's own connection; other tasks (push fan-out, observability)
/// only read snapshots.
#[derive(Debug)]
pub struct Proxy {
    id: String,
    cluster: String,
    identities: Option<Vec<String>>,
    state: Mutex<ProxyState>,
}

#[derive(Debug)]
struct ProxyState {
    watched_resources: HashMap<String, WatchedResource>,
    last_push_context: Arc<PushContext>,
    last_push_time: Instant,
}

impl Proxy {
    /// Create a proxy for `node`, starting from the snapshot `push`.
    pub fn new(node: &Node, identities: Option<Vec<String>>, push: Arc<PushContext>) -> Self {
        Self {
            id: node.id.clone(),
            cluster: node.cluster.clone(),
            identities,
            state: Mutex::new(ProxyState {
                watched_resources: HashMap::new(),
                last_push_context: push,
                last_push_time: Instant::now(),
            }),
        }
    }

    /// The node identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The cluster the node reported.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Identities established by authentication, `None` for anonymous streams.
    pub fn identities(&self) -> Option<&[String]> {
        self.identities.as_deref()
    }

    /// The snapshot most recently computed for this proxy.
    pub fn last_push_context(&self) -> Arc<PushContext> {
        self.state.lock().last_push_context.clone()
    }

    /// When the most recent full push for this proxy started.
    pub fn last_push_time(&self) -> Instant {
        self.state.lock().last_push_time
    }

    pub(crate) fn set_push_state(&self, push: Arc<PushContext>, start: Instant) {
        let mut state = self.state.lock();
        state.last_push_context = push;
        state.last_push_time = start;
    }

    /// A copy of the subscription state for `type_url`.
    pub fn watched_resource(&self, type_url: &str) -> Option<WatchedResource> {
        self.state.lock().watched_resources.get(type_url).cloned()
    }

    /// Returns true if the proxy subscribed to `type_url`.
    pub fn is_watching(&self, type_url: &str) -> bool {
        self.state.lock().watched_resources.contains_key(type_url)
    }

    /// Atomically read and modify the record for `type_url`.
    ///
    /// `f` sees `None` when there is no record yet; leaving `Some` in place
    /// stores it, leaving `None` removes it. The lock is held while `f` runs.
    pub(crate) fn update_watched_resource<R>(
        &self,
        type_url: &str,
        f: impl FnOnce(&mut Option<WatchedResource>) -> R,
    ) -> R {
        let mut state = self.state.lock();
        let mut entry = state.watched_resources.remove(type_url);
        let result = f(&mut entry);
        if let Some(watched) = entry {
            state.watched_resources.insert(type_url.to_string(), watched);
        }
        result
    }

    /// Force a response to the next request for `type_url`, even if it does
    /// not change the subscription. Returns false if the type is not watched.
    pub fn force_next_response(&self, type_url: &str) -> bool {
        self.update_watched_resource(type_url, |watched| match watched {
            Some(watched) => {
                watched.always_respond = true;
                true
            }
            None => false,
        })
    }

    /// Copies of all records, well-known types first in push order, then the
    /// remaining types sorted by URL.
    pub fn watched_resources_by_order(&self) -> Vec<WatchedResource> {
        let state = self.state.lock();
        let mut ordered: Vec<WatchedResource> = PUSH_ORDER
            .iter()
            .filter_map(|type_url| state.watched_resources.get(*type_url).cloned())
            .collect();

        let mut rest: Vec<&WatchedResource> = state
            .watched_resources
            .values()
            .filter(|w| !PUSH_ORDER.contains(&w.type_url.as_str()))
            .collect();
        rest.sort_by(|a, b| a.type_url.cmp(&b.type_url));
        ordered.extend(rest.into_iter().cloned());
        ordered
    }
}
