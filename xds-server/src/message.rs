//! Crate-owned delta xDS message types.
//!
//! These types are codegen-agnostic and serve as the interface between
//! the discovery server logic and the codec layer. The codec converts these
//! to/from the wire format (e.g., prost/envoy-types).

use std::collections::HashMap;

use bytes::Bytes;

/// A delta discovery request received from a proxy.
#[derive(Debug, Clone, Default)]
pub struct DeltaDiscoveryRequest {
    /// The node making the request. Only required on the first request of a stream.
    pub node: Option<Node>,
    /// Type URL of the resources being subscribed to.
    pub type_url: String,
    /// Resource names to add to the subscription, in request order.
    pub resource_names_subscribe: Vec<String>,
    /// Resource names to remove from the subscription, in request order.
    pub resource_names_unsubscribe: Vec<String>,
    /// Resources the client already has, keyed by name, with their versions.
    /// Only meaningful on the first request for a type after a reconnect.
    pub initial_resource_versions: HashMap<String, String>,
    /// The nonce of the response being acknowledged, or empty for a
    /// spontaneous request.
    pub response_nonce: String,
    /// Set when the client rejected the response identified by `response_nonce`.
    pub error_detail: Option<ErrorDetail>,
}

/// A delta discovery response sent to a proxy.
#[derive(Debug, Clone, Default)]
pub struct DeltaDiscoveryResponse {
    /// Version of the configuration snapshot this response was built from.
    pub system_version_info: String,
    /// Resources to add or update.
    pub resources: Vec<Resource>,
    /// Type URL of the resources.
    pub type_url: String,
    /// Names of resources the client must drop.
    pub removed_resources: Vec<String>,
    /// Nonce for this response, to be echoed back in the next request.
    pub nonce: String,
    /// Identifier of the control plane that produced this response.
    pub control_plane: Option<String>,
}

/// A named resource carried in a [`DeltaDiscoveryResponse`].
#[derive(Debug, Clone)]
pub struct Resource {
    /// The resource name.
    pub name: String,
    /// Version of this individual resource.
    pub version: String,
    /// The resource wrapped as `google.protobuf.Any`.
    pub resource: ResourceAny,
}

impl Resource {
    /// Create a resource with an empty version.
    pub fn new(name: impl Into<String>, resource: ResourceAny) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            resource,
        }
    }

    /// Set the resource version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// A resource wrapped as google.protobuf.Any.
#[derive(Debug, Clone)]
pub struct ResourceAny {
    /// Type URL of the resource.
    pub type_url: String,
    /// Serialized resource bytes.
    pub value: Bytes,
}

/// Node identification sent by the proxy.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// An opaque node identifier. Must be non-empty on the first request.
    pub id: String,
    /// The cluster the node belongs to.
    pub cluster: String,
    /// Free-form string identifying the client type (e.g., "envoy", "grpc").
    pub user_agent_name: String,
}

impl Node {
    /// Create a node with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the cluster.
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }
}

/// Error details attached to a NACK.
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    /// gRPC status code.
    pub code: i32,
    /// Error message.
    pub message: String,
}
