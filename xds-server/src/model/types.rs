//! Well-known resource type URLs.

/// Prefix shared by all protobuf `Any` type URLs.
pub const API_TYPE_PREFIX: &str = "type.googleapis.com/";

/// Cluster discovery (CDS).
pub const CLUSTER_TYPE: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
/// Endpoint discovery (EDS).
pub const ENDPOINT_TYPE: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
/// Listener discovery (LDS).
pub const LISTENER_TYPE: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
/// Route discovery (RDS).
pub const ROUTE_TYPE: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
/// Secret discovery (SDS).
pub const SECRET_TYPE: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";
/// Workload address discovery. Never auto-populated by a wildcard request.
pub const ADDRESS_TYPE: &str = "type.googleapis.com/xds.workload.v1.Address";
/// Health probes sent by proxies; accepted and ignored.
pub const HEALTH_INFO_TYPE: &str = "type.googleapis.com/xds.v1.HealthInformation";
/// Prefix of debug types. Debug requests are served but never tracked.
pub const DEBUG_TYPE: &str = "xds.io/debug";

/// Order in which watched types are pushed: clusters before their endpoints,
/// listeners before their routes.
pub(crate) const PUSH_ORDER: [&str; 6] = [
    CLUSTER_TYPE,
    ENDPOINT_TYPE,
    LISTENER_TYPE,
    ROUTE_TYPE,
    SECRET_TYPE,
    ADDRESS_TYPE,
];

/// Returns the short name used in logs for a type URL.
pub fn short_type(type_url: &str) -> &str {
    match type_url {
        CLUSTER_TYPE => "CDS",
        ENDPOINT_TYPE => "EDS",
        LISTENER_TYPE => "LDS",
        ROUTE_TYPE => "RDS",
        SECRET_TYPE => "SDS",
        ADDRESS_TYPE => "WDS",
        HEALTH_INFO_TYPE => "HEALTH",
        other => other.strip_prefix(API_TYPE_PREFIX).unwrap_or(other),
    }
}

/// Returns true for debug type URLs.
pub fn is_debug_type(type_url: &str) -> bool {
    type_url.starts_with(DEBUG_TYPE)
}
