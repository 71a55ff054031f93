//! Prost-based codec using envoy-types.

use envoy_types::pb::envoy::config::core::v3 as core;
use envoy_types::pb::envoy::service::discovery::v3 as discovery;
use envoy_types::pb::google::protobuf::Any;

use crate::codec::XdsCodec;
use crate::error::{Error, Result};
use crate::message::{DeltaDiscoveryRequest, DeltaDiscoveryResponse, ErrorDetail, Node};

/// A codec that converts to and from the envoy-types protobuf messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProstCodec;

impl XdsCodec for ProstCodec {
    type Request = discovery::DeltaDiscoveryRequest;
    type Response = discovery::DeltaDiscoveryResponse;

    fn decode_request(&self, request: Self::Request) -> Result<DeltaDiscoveryRequest> {
        if request.type_url.is_empty() {
            return Err(Error::Decode("request has no type_url".into()));
        }

        Ok(DeltaDiscoveryRequest {
            node: request.node.map(|node| Node {
                id: node.id,
                cluster: node.cluster,
                user_agent_name: node.user_agent_name,
            }),
            type_url: request.type_url,
            resource_names_subscribe: request.resource_names_subscribe,
            resource_names_unsubscribe: request.resource_names_unsubscribe,
            initial_resource_versions: request.initial_resource_versions.into_iter().collect(),
            response_nonce: request.response_nonce,
            error_detail: request.error_detail.map(|status| ErrorDetail {
                code: status.code,
                message: status.message,
            }),
        })
    }

    fn encode_response(&self, response: &DeltaDiscoveryResponse) -> Result<Self::Response> {
        Ok(discovery::DeltaDiscoveryResponse {
            system_version_info: response.system_version_info.clone(),
            type_url: response.type_url.clone(),
            nonce: response.nonce.clone(),
            removed_resources: response.removed_resources.clone(),
            resources: response
                .resources
                .iter()
                .map(|r| discovery::Resource {
                    name: r.name.clone(),
                    version: r.version.clone(),
                    resource: Some(Any {
                        type_url: r.resource.type_url.clone(),
                        value: r.resource.value.to_vec(),
                    }),
                    ..Default::default()
                })
                .collect(),
            control_plane: response
                .control_plane
                .as_ref()
                .map(|identifier| core::ControlPlane {
                    identifier: identifier.clone(),
                }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Resource, ResourceAny};
    use bytes::Bytes;
    use envoy_types::pb::google::rpc::Status;

    const CLUSTER_TYPE: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";

    #[test]
    fn test_decode_request_with_node() {
        let codec = ProstCodec;
        let request = discovery::DeltaDiscoveryRequest {
            node: Some(core::Node {
                id: "sidecar~10.0.0.1~pod.ns~ns.svc.cluster.local".to_string(),
                cluster: "pod.ns".to_string(),
                user_agent_name: "envoy".to_string(),
                ..Default::default()
            }),
            type_url: CLUSTER_TYPE.to_string(),
            resource_names_subscribe: vec!["svc-a".to_string(), "svc-b".to_string()],
            initial_resource_versions: [("svc-c".to_string(), "3".to_string())]
                .into_iter()
                .collect(),
            ..Default::default()
        };

        let decoded = codec.decode_request(request).unwrap();
        let node = decoded.node.unwrap();
        assert_eq!(node.id, "sidecar~10.0.0.1~pod.ns~ns.svc.cluster.local");
        assert_eq!(node.cluster, "pod.ns");
        assert_eq!(node.user_agent_name, "envoy");
        assert_eq!(decoded.type_url, CLUSTER_TYPE);
        assert_eq!(decoded.resource_names_subscribe, vec!["svc-a", "svc-b"]);
        assert_eq!(
            decoded.initial_resource_versions.get("svc-c").map(String::as_str),
            Some("3")
        );
        assert!(decoded.response_nonce.is_empty());
        assert!(decoded.error_detail.is_none());
    }

    #[test]
    fn test_decode_request_nack() {
        let codec = ProstCodec;
        let request = discovery::DeltaDiscoveryRequest {
            type_url: CLUSTER_TYPE.to_string(),
            response_nonce: "v1-abc".to_string(),
            error_detail: Some(Status {
                code: 3,
                message: "cluster svc-a: invalid lb policy".to_string(),
                details: vec![],
            }),
            ..Default::default()
        };

        let decoded = codec.decode_request(request).unwrap();
        assert!(decoded.node.is_none());
        assert_eq!(decoded.response_nonce, "v1-abc");
        let detail = decoded.error_detail.unwrap();
        assert_eq!(detail.code, 3);
        assert_eq!(detail.message, "cluster svc-a: invalid lb policy");
    }

    #[test]
    fn test_decode_request_without_type_url() {
        let err = ProstCodec
            .decode_request(discovery::DeltaDiscoveryRequest::default())
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_encode_response() {
        let codec = ProstCodec;
        let response = DeltaDiscoveryResponse {
            system_version_info: "2024-01-01T00:00:00Z/7".to_string(),
            type_url: CLUSTER_TYPE.to_string(),
            nonce: "2024-01-01T00:00:00Z/7deadbeef".to_string(),
            resources: vec![
                Resource::new(
                    "svc-b",
                    ResourceAny {
                        type_url: CLUSTER_TYPE.to_string(),
                        value: Bytes::from_static(b"fake-cluster-bytes"),
                    },
                )
                .with_version("7"),
            ],
            removed_resources: vec!["svc-a".to_string()],
            control_plane: Some("sail".to_string()),
        };

        let encoded = codec.encode_response(&response).unwrap();
        assert_eq!(encoded.system_version_info, "2024-01-01T00:00:00Z/7");
        assert_eq!(encoded.type_url, CLUSTER_TYPE);
        assert_eq!(encoded.nonce, "2024-01-01T00:00:00Z/7deadbeef");
        assert_eq!(encoded.removed_resources, vec!["svc-a"]);
        assert_eq!(encoded.control_plane.unwrap().identifier, "sail");
        assert_eq!(encoded.resources.len(), 1);
        let resource = &encoded.resources[0];
        assert_eq!(resource.name, "svc-b");
        assert_eq!(resource.version, "7");
        let any = resource.resource.as_ref().unwrap();
        assert_eq!(any.type_url, CLUSTER_TYPE);
        assert_eq!(any.value, b"fake-cluster-bytes");
    }
}
