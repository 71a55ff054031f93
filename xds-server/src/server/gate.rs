//! Decides whether a push concerns a proxy at all.

use std::sync::Arc;

use crate::model::{Proxy, PushRequest};

/// Filters push requests per proxy before any generator runs.
pub trait ProxyNeedsPush: Send + Sync + 'static {
    /// Returns the request to perform for `proxy`, or `None` to skip it.
    ///
    /// Implementations may narrow the request (for example drop config keys
    /// the proxy cannot see) by returning a different one.
    fn needs_push(&self, proxy: &Proxy, request: Arc<PushRequest>) -> Option<Arc<PushRequest>>;
}

/// Pushes when the request is forced, is a full push without specific
/// changes, or changed a type the proxy watches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPushGate;

impl ProxyNeedsPush for DefaultPushGate {
    fn needs_push(&self, proxy: &Proxy, request: Arc<PushRequest>) -> Option<Arc<PushRequest>> {
        if request.forced || (request.full && request.configs_updated.is_empty()) {
            return Some(request);
        }
        let affected = request
            .configs_updated
            .iter()
            .any(|key| proxy.is_watching(&key.type_url));
        affected.then_some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Node;
    use crate::model::types::{CLUSTER_TYPE, LISTENER_TYPE};
    use crate::model::{ConfigKey, PushContext, TriggerReason, WatchedResource};

    fn proxy_watching(type_url: &str) -> Proxy {
        let proxy = Proxy::new(&Node::new("n"), None, Arc::new(PushContext::default()));
        proxy.update_watched_resource(type_url, |w| *w = Some(WatchedResource::new(type_url)));
        proxy
    }

    #[test]
    fn test_default_gate() {
        let proxy = proxy_watching(CLUSTER_TYPE);
        let push = Arc::new(PushContext::new("v2"));

        let full = Arc::new(PushRequest::full(push.clone(), TriggerReason::GlobalUpdate));
        assert!(DefaultPushGate.needs_push(&proxy, full).is_some());

        let unrelated = Arc::new(
            PushRequest::incremental(push.clone(), TriggerReason::ConfigUpdate)
                .with_config_updated(ConfigKey::new(LISTENER_TYPE, "l1")),
        );
        assert!(DefaultPushGate.needs_push(&proxy, unrelated.clone()).is_none());

        let forced = Arc::new((*unrelated).clone().with_forced(true));
        assert!(DefaultPushGate.needs_push(&proxy, forced).is_some());

        let related = Arc::new(
            PushRequest::full(push, TriggerReason::ConfigUpdate)
                .with_config_updated(ConfigKey::new(CLUSTER_TYPE, "svc-a")),
        );
        assert!(DefaultPushGate.needs_push(&proxy, related).is_some());
    }
}
