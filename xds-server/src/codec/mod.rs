//! Codec for converting delta xDS messages.
//!
//! The codec layer converts between crate-owned message types
//! ([`DeltaDiscoveryRequest`], [`DeltaDiscoveryResponse`]) and the wire
//! representation used by a transport. This abstraction allows different
//! protobuf implementations to be used with the same discovery server logic.

use crate::error::Result;
use crate::message::{DeltaDiscoveryRequest, DeltaDiscoveryResponse};

#[cfg(feature = "codegen-prost")]
pub mod prost;

/// Trait for converting delta discovery messages to and from a wire type.
pub trait XdsCodec: Send + Sync + 'static {
    /// Wire representation of an inbound request.
    type Request: Send + 'static;
    /// Wire representation of an outbound response.
    type Response: Send + 'static;

    /// Decode a wire request into a [`DeltaDiscoveryRequest`].
    fn decode_request(&self, request: Self::Request) -> Result<DeltaDiscoveryRequest>;

    /// Encode a [`DeltaDiscoveryResponse`] into its wire form.
    fn encode_response(&self, response: &DeltaDiscoveryResponse) -> Result<Self::Response>;
}
