//! Reconciliation of a subscription name set against delta requests.

use std::collections::BTreeSet;

use crate::message::DeltaDiscoveryRequest;

/// The resource name a client uses to (un)subscribe to every resource of a type.
pub const WILDCARD: &str = "*";

/// Result of applying one delta request to a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    /// The subscribed names after the request, never containing [`WILDCARD`].
    pub names: BTreeSet<String>,
    /// Whether the request asks for every resource of the type.
    pub wildcard: bool,
    /// Whether any name was newly added or actually removed.
    pub changed: bool,
}

/// Applies the subscribe, unsubscribe and initial-version lists of `request`
/// to `existing`.
///
/// Subscribed names and the keys of `initial_resource_versions` are inserted,
/// then unsubscribed names are removed. A literal `"*"` is never kept as a
/// name: it marks the request as wildcard. A request with an empty subscribe
/// list is always wildcard.
pub fn delta_watched_resources(
    existing: Option<BTreeSet<String>>,
    request: &DeltaDiscoveryRequest,
) -> SubscriptionUpdate {
    let mut names = existing.unwrap_or_default();
    let mut changed = false;

    for name in request
        .resource_names_subscribe
        .iter()
        .chain(request.initial_resource_versions.keys())
    {
        if names.insert(name.clone()) {
            changed = true;
        }
    }
    for name in &request.resource_names_unsubscribe {
        if names.remove(name) {
            changed = true;
        }
    }

    let wildcard = names.remove(WILDCARD) || request.resource_names_subscribe.is_empty();

    SubscriptionUpdate {
        names,
        wildcard,
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(subscribe: &[&str], unsubscribe: &[&str]) -> DeltaDiscoveryRequest {
        DeltaDiscoveryRequest {
            resource_names_subscribe: subscribe.iter().map(|s| s.to_string()).collect(),
            resource_names_unsubscribe: unsubscribe.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_subscribe_is_wildcard() {
        let update = delta_watched_resources(None, &request(&[], &[]));
        assert!(update.wildcard);
        assert!(update.names.is_empty());
        assert!(!update.changed);

        // Regardless of what was subscribed before.
        let update = delta_watched_resources(Some(set(&["a", "b"])), &request(&[], &["a"]));
        assert!(update.wildcard);
        assert_eq!(update.names, set(&["b"]));
        assert!(update.changed);
    }

    #[test]
    fn test_explicit_names() {
        let update = delta_watched_resources(None, &request(&["svc-a", "svc-b"], &[]));
        assert_eq!(update.names, set(&["svc-a", "svc-b"]));
        assert!(!update.wildcard);
        assert!(update.changed);
    }

    #[test]
    fn test_star_is_never_a_name() {
        let update = delta_watched_resources(None, &request(&["*", "svc-a"], &[]));
        assert_eq!(update.names, set(&["svc-a"]));
        assert!(update.wildcard);

        let update = delta_watched_resources(Some(set(&["svc-a"])), &request(&["svc-b"], &["*"]));
        assert_eq!(update.names, set(&["svc-a", "svc-b"]));
        assert!(!update.wildcard);
    }

    #[test]
    fn test_resubscribe_is_not_a_change() {
        let update = delta_watched_resources(Some(set(&["svc-a"])), &request(&["svc-a"], &[]));
        assert!(!update.changed);

        let update = delta_watched_resources(Some(set(&["svc-a"])), &request(&["svc-a"], &["svc-z"]));
        assert!(!update.changed);
    }

    #[test]
    fn test_initial_resource_versions_are_subscribed() {
        let mut req = request(&["svc-a"], &[]);
        req.initial_resource_versions
            .insert("svc-b".to_string(), "12".to_string());

        let update = delta_watched_resources(None, &req);
        assert_eq!(update.names, set(&["svc-a", "svc-b"]));
        assert!(update.changed);
    }

    #[test]
    fn test_sequence_matches_set_semantics() {
        // Each step: (subscribe, unsubscribe). The expected set is computed
        // independently with plain insert/delete operations.
        let steps: &[(&[&str], &[&str])] = &[
            (&["a", "b", "c"], &[]),
            (&["d"], &["a"]),
            (&["*"], &["b", "x"]),
            (&["a"], &["d", "*"]),
            (&["c"], &["c"]),
            (&["e", "f"], &["e"]),
        ];

        let mut names: Option<BTreeSet<String>> = None;
        let mut expected = BTreeSet::new();
        for (subscribe, unsubscribe) in steps {
            for name in subscribe.iter() {
                expected.insert(name.to_string());
            }
            for name in unsubscribe.iter() {
                expected.remove(*name);
            }
            expected.remove(WILDCARD);

            let update = delta_watched_resources(names.take(), &request(subscribe, unsubscribe));
            assert_eq!(update.names, expected);
            assert_eq!(update.wildcard, subscribe.contains(&WILDCARD));
            names = Some(update.names);
        }
        assert_eq!(names.unwrap(), set(&["a", "f"]));
    }
}
