//! Request handling and push dispatch for delta streams.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::message::{DeltaDiscoveryRequest, DeltaDiscoveryResponse};
use crate::model::types::{
    ADDRESS_TYPE, CLUSTER_TYPE, ENDPOINT_TYPE, HEALTH_INFO_TYPE, is_debug_type, short_type,
};
use crate::model::{
    Proxy, PushRequest, ResourceDelta, TriggerReason, WILDCARD, WatchedResource,
    delta_watched_resources,
};
use crate::server::DiscoveryServer;
use crate::server::connection::Connection;
use crate::transport::ResponseSink;

impl DiscoveryServer {
    /// Handle one request read from the stream.
    pub(crate) async fn process_delta_request<S: ResponseSink>(
        &self,
        con: &mut Connection<S>,
        request: DeltaDiscoveryRequest,
    ) -> Result<()> {
        let stype = short_type(&request.type_url);
        debug!(
            "ADS:{stype}: REQ {} resources sub:{} unsub:{} nonce:{}",
            con.id(),
            request.resource_names_subscribe.len(),
            request.resource_names_unsubscribe.len(),
            request.response_nonce
        );

        if request.type_url == HEALTH_INFO_TYPE {
            return Ok(());
        }
        if is_debug_type(&request.type_url) {
            let watched = WatchedResource::new(&request.type_url)
                .with_names(&request.resource_names_subscribe);
            let push = PushRequest::full(con.proxy().last_push_context(), TriggerReason::Debug)
                .with_forced(true);
            return self.push_delta_xds(con, &watched, &push).await;
        }

        if !should_respond_delta(con.id(), con.proxy(), &request) {
            return Ok(());
        }

        let delta = ResourceDelta {
            subscribed: delta_watched_resources(None, &request).names,
            unsubscribed: request
                .resource_names_unsubscribe
                .iter()
                .filter(|name| *name != WILDCARD)
                .cloned()
                .collect(),
        };
        let proxy = con.proxy();
        let push = PushRequest::full(proxy.last_push_context(), TriggerReason::ProxyRequest)
            .with_start(proxy.last_push_time())
            .with_forced(true)
            .with_delta(delta);

        if let Some(watched) = proxy.watched_resource(&request.type_url) {
            self.push_delta_xds(con, &watched, &push).await?;
        }
        if request.type_url != CLUSTER_TYPE {
            return Ok(());
        }
        self.force_eds_push(con).await
    }

    /// Endpoints depend on clusters: after answering a cluster request the
    /// proxy must also receive endpoints, if it watches them.
    async fn force_eds_push<S: ResponseSink>(&self, con: &mut Connection<S>) -> Result<()> {
        let proxy = con.proxy();
        let Some(watched) = proxy.watched_resource(ENDPOINT_TYPE) else {
            return Ok(());
        };
        let push = PushRequest::full(proxy.last_push_context(), TriggerReason::DependentResource)
            .with_start(proxy.last_push_time())
            .with_forced(true);
        info!("ADS:{}: FORCE {} PUSH for warming.", short_type(ENDPOINT_TYPE), con.id());
        self.push_delta_xds(con, &watched, &push).await
    }

    /// Handle one push event for the connection.
    pub(crate) async fn push_connection_delta<S: ResponseSink>(
        &self,
        con: &mut Connection<S>,
        request: Arc<PushRequest>,
    ) -> Result<()> {
        if request.full {
            con.proxy().set_push_state(request.push.clone(), request.start);
        }

        let Some(request) = self.gate.needs_push(con.proxy(), request) else {
            debug!("Skipping push to {}, no updates required", con.id());
            return Ok(());
        };

        let ordered = con.proxy().watched_resources_by_order();
        for watched in &ordered {
            self.push_delta_xds(con, watched, &request).await?;
        }
        Ok(())
    }

    /// Generate and send the response for one watched type.
    pub(crate) async fn push_delta_xds<S: ResponseSink>(
        &self,
        con: &mut Connection<S>,
        watched: &WatchedResource,
        request: &PushRequest,
    ) -> Result<()> {
        let Some(generator) = self.generators.get(&watched.type_url) else {
            return Ok(());
        };
        let output = generator
            .generate(con.proxy(), watched, request)
            .map_err(|source| Error::Generator {
                type_url: watched.type_url.clone(),
                source,
            })?;
        let Some(output) = output else {
            return Ok(());
        };

        let removed = match output.removed {
            Some(removed) => removed,
            None if request.full => {
                let mut removed: BTreeSet<&str> = watched
                    .resource_names
                    .iter()
                    .chain(&request.delta.unsubscribed)
                    .map(String::as_str)
                    .collect();
                for resource in &output.resources {
                    removed.remove(resource.name.as_str());
                }
                removed.into_iter().map(str::to_string).collect()
            }
            None => Vec::new(),
        };

        let stype = short_type(&watched.type_url);
        if !removed.is_empty() {
            info!("ADS:{stype} REMOVE for node:{} {removed:?}", con.id());
        }

        let ptype = if output.details.incremental { "PUSH INC" } else { "PUSH" };
        let mut info = String::new();
        if !output.details.additional_info.is_empty() {
            let _ = write!(info, " {}", output.details.additional_info);
        }
        let resource_count = output.resources.len();
        let removed_count = removed.len();

        let version = &request.push.push_version;
        let response = DeltaDiscoveryResponse {
            system_version_info: version.clone(),
            resources: output.resources,
            type_url: watched.type_url.clone(),
            removed_resources: removed,
            nonce: nonce(version),
            control_plane: Some(self.config.control_plane_id().to_string()),
        };
        con.send_delta(response, output.resource_names).await?;

        if request.full {
            info!(
                "{stype}: {ptype}{} for node:{} resources:{resource_count} removed:{removed_count}{info}",
                request.push_reason(),
                con.proxy().id()
            );
        } else {
            debug!(
                "{stype}: {ptype} for node:{} resources:{resource_count} removed:{removed_count}{info}",
                con.proxy().id()
            );
        }
        Ok(())
    }
}

/// What applying a request to the registry decided.
enum Admission {
    Init { reconnect: bool },
    ExpiredNonce { sent: String },
    Update { changed: bool, always_respond: bool },
}

/// Applies `request` to the proxy's registry and decides whether it must be
/// answered.
///
/// NACKs and stale nonces never get a response and stale nonces leave the
/// registry untouched.
pub(crate) fn should_respond_delta(conn_id: &str, proxy: &Proxy, request: &DeltaDiscoveryRequest) -> bool {
    let type_url = request.type_url.as_str();
    let stype = short_type(type_url);

    if let Some(detail) = &request.error_detail {
        warn!(
            "ADS:{stype}: ACK ERROR {conn_id} {}:{}",
            detail.code, detail.message
        );
        proxy.update_watched_resource(type_url, |entry| {
            let watched = entry.get_or_insert_with(|| {
                WatchedResource::new(type_url).with_names(
                    request
                        .resource_names_subscribe
                        .iter()
                        .filter(|name| *name != WILDCARD),
                )
            });
            watched.last_error = Some(detail.message.clone());
        });
        return false;
    }

    debug!(
        "ADS:{stype} REQUEST {conn_id}: sub:{:?} unsub:{:?} initial:{:?}",
        request.resource_names_subscribe,
        request.resource_names_unsubscribe,
        request.initial_resource_versions
    );

    let admission = proxy.update_watched_resource(type_url, |entry| {
        let Some(watched) = entry.as_mut() else {
            let update = delta_watched_resources(None, request);
            let mut watched = WatchedResource::new(type_url);
            // Addresses are only ever sent on demand.
            if !(type_url == ADDRESS_TYPE && update.wildcard) {
                watched.resource_names = update.names;
                watched.wildcard = update.wildcard;
            }
            *entry = Some(watched);
            return Admission::Init {
                reconnect: !request.initial_resource_versions.is_empty(),
            };
        };

        if !request.response_nonce.is_empty() && request.response_nonce != watched.nonce_sent {
            return Admission::ExpiredNonce {
                sent: watched.nonce_sent.clone(),
            };
        }

        let update = delta_watched_resources(Some(std::mem::take(&mut watched.resource_names)), request);
        watched.resource_names = update.names;

        watched.wildcard = wildcard_after(watched.wildcard, request);
        let changed = update.changed;

        if !request.response_nonce.is_empty() {
            watched.last_error = None;
            watched.nonce_acked = request.response_nonce.clone();
        }
        let always_respond = std::mem::take(&mut watched.always_respond);
        Admission::Update {
            changed,
            always_respond,
        }
    });

    let nonce = &request.response_nonce;
    match admission {
        Admission::Init { reconnect: true } => {
            info!(
                "ADS:{stype}: RECONNECT {conn_id} {nonce} resources:{}",
                request.initial_resource_versions.len()
            );
            true
        }
        Admission::Init { reconnect: false } => {
            info!("ADS:{stype}: INIT {conn_id} {nonce}");
            true
        }
        Admission::ExpiredNonce { sent } => {
            debug!("ADS:{stype}: REQ {conn_id} Expired nonce received {nonce}, sent {sent}");
            false
        }
        Admission::Update {
            changed,
            always_respond,
        } => {
            let spontaneous = nonce.is_empty();
            if spontaneous != changed {
                debug!("ADS:{stype}: Subscribed resources check mismatch: {spontaneous} vs {changed}");
            }
            if changed {
                info!("ADS:{stype}: RESOURCE CHANGE {conn_id} {nonce}");
                true
            } else if always_respond {
                info!("ADS:{stype}: FORCE RESPONSE {conn_id} for warming.");
                true
            } else {
                debug!("ADS:{stype}: ACK {conn_id} {nonce}");
                false
            }
        }
    }
}

/// The wildcard flag after `request`: cleared by unsubscribing `"*"` or by
/// an explicit subscribe list, set by subscribing `"*"`.
fn wildcard_after(current: bool, request: &DeltaDiscoveryRequest) -> bool {
    if request.resource_names_unsubscribe.iter().any(|name| name == WILDCARD) {
        false
    } else if request.resource_names_subscribe.iter().any(|name| name == WILDCARD) {
        true
    } else if !request.resource_names_subscribe.is_empty() {
        false
    } else {
        current
    }
}

/// A fresh nonce: the snapshot version followed by 32 random hex digits.
pub(crate) fn nonce(prefix: &str) -> String {
    format!("{prefix}{:032x}", fastrand::u128(..))
}
