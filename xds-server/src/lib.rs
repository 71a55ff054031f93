//! A Rust implementation of an incremental ([delta]) xDS discovery server.
//!
//! This crate provides the protocol engine of a control plane. It handles:
//! - Delta ADS stream lifecycle (admission, initialization, termination)
//! - Subscription tracking per proxy and resource type, including wildcards
//! - Nonce tracking and ACK/NACK handling
//! - Fanning configuration pushes out to every connected proxy
//!
//! It does NOT compute configuration. Resources are produced by pluggable
//! [generators](generator) registered per type URL.
//!
//! # Example
//!
//! ```ignore
//! use xds_server::{AdsService, DiscoveryServer, GeneratorRegistry, ServerConfig};
//! use xds_server::model::types::CLUSTER_TYPE;
//!
//! let generators = GeneratorRegistry::new().with_full(CLUSTER_TYPE, Clusters::new(snapshot));
//! let server = DiscoveryServer::builder(ServerConfig::new("istiod-1"))
//!     .generators(generators)
//!     .build();
//! server.set_ready();
//!
//! // Push a new snapshot to every connected proxy.
//! let push = PushRequest::full(Arc::new(PushContext::new("2024-06-01T10:00:00Z/7")), TriggerReason::ConfigUpdate);
//! server.push(push).await;
//! ```
//!
//! # Feature Flags
//!
//! - `transport-tonic`: Enables the `tonic` gRPC service. This enables the `codegen-prost` feature. Enabled by default.
//! - `codegen-prost`: Enables the codec for the `envoy-types` protobuf messages. Enabled by default.
//!
//! [delta]: https://www.envoyproxy.io/docs/envoy/latest/api-docs/xds_protocol#incremental-xds

pub mod codec;
pub mod error;
pub mod generator;
pub mod message;
pub mod model;
pub mod server;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use codec::XdsCodec;
pub use error::{BoxError, Error, Result};
pub use generator::{
    DeltaGenerated, DeltaResourceGenerator, Generated, Generator, GeneratorRegistry, LogDetails,
    ResourceGenerator,
};
pub use message::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, ErrorDetail, Node, Resource, ResourceAny,
};
pub use model::{
    ConfigKey, Proxy, PushContext, PushRequest, ReasonStats, ResourceDelta, TriggerReason,
    WatchedResource,
};
pub use server::auth::Authenticator;
pub use server::config::{RateLimitConfig, ServerConfig};
pub use server::gate::{DefaultPushGate, ProxyNeedsPush};
pub use server::rate_limit::{BoxFuture, RequestLimiter, TokenBucket};
pub use server::{DiscoveryServer, DiscoveryServerBuilder};
pub use transport::{RequestStream, ResponseSink, StreamContext};

// Prost codec
#[cfg(feature = "codegen-prost")]
pub use codec::prost::ProstCodec;

// Tonic transport
#[cfg(feature = "transport-tonic")]
pub use transport::tonic::{AdsService, TonicRequestStream, TonicResponseSink};
