//! `tonic` based transport implementation.
//!
//! [`AdsService`] implements envoy's `AggregatedDiscoveryService` on top of a
//! [`DiscoveryServer`]. Only the delta RPC is served; the state-of-the-world
//! RPC answers `UNIMPLEMENTED`.

use std::pin::Pin;
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3 as discovery;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::{
    AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::KeyAndValueRef;
use tonic::{Request, Response, Status, Streaming};

use crate::codec::XdsCodec;
use crate::codec::prost::ProstCodec;
use crate::error::{Error, Result};
use crate::message::{DeltaDiscoveryRequest, DeltaDiscoveryResponse};
use crate::server::DiscoveryServer;
use crate::transport::{RequestStream, ResponseSink, StreamContext};

/// Responses buffered between a stream's main loop and tonic.
const RESPONSE_CHANNEL_BUFFER_SIZE: usize = 16;

/// Inbound half of a tonic delta stream.
#[derive(Debug)]
pub struct TonicRequestStream {
    inbound: Streaming<discovery::DeltaDiscoveryRequest>,
    codec: ProstCodec,
}

impl RequestStream for TonicRequestStream {
    async fn recv(&mut self) -> Result<Option<DeltaDiscoveryRequest>> {
        match self.inbound.message().await? {
            Some(request) => self.codec.decode_request(request).map(Some),
            None => Ok(None),
        }
    }
}

/// Outbound half of a tonic delta stream.
#[derive(Debug)]
pub struct TonicResponseSink {
    sender: mpsc::Sender<std::result::Result<discovery::DeltaDiscoveryResponse, Status>>,
    codec: ProstCodec,
}

impl ResponseSink for TonicResponseSink {
    async fn send(&mut self, response: DeltaDiscoveryResponse) -> Result<()> {
        let response = self.codec.encode_response(&response)?;
        self.sender
            .send(Ok(response))
            .await
            .map_err(|_| Error::StreamClosed)
    }
}

/// `AggregatedDiscoveryService` backed by a [`DiscoveryServer`].
///
/// # Example
///
/// ```ignore
/// let server = DiscoveryServer::builder(ServerConfig::default())
///     .generators(generators)
///     .build();
/// server.set_ready();
///
/// tonic::transport::Server::builder()
///     .add_service(AdsService::new(server).into_server())
///     .serve("[::]:15010".parse()?)
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct AdsService {
    server: Arc<DiscoveryServer>,
    codec: ProstCodec,
}

impl AdsService {
    /// Serve streams with `server`.
    pub fn new(server: Arc<DiscoveryServer>) -> Self {
        Self {
            server,
            codec: ProstCodec,
        }
    }

    /// Wrap the service for registration with a tonic router.
    pub fn into_server(self) -> AggregatedDiscoveryServiceServer<Self> {
        AggregatedDiscoveryServiceServer::new(self)
    }
}

fn stream_context<T>(request: &Request<T>) -> StreamContext {
    let mut ctx = StreamContext::new(request.remote_addr());
    for entry in request.metadata().iter() {
        if let KeyAndValueRef::Ascii(key, value) = entry {
            if let Ok(value) = value.to_str() {
                ctx = ctx.with_metadata(key.as_str(), value);
            }
        }
    }
    ctx
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream = Pin<
        Box<
            dyn Stream<Item = std::result::Result<discovery::DiscoveryResponse, Status>>
                + Send,
        >,
    >;

    async fn stream_aggregated_resources(
        &self,
        _request: Request<Streaming<discovery::DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented(
            "state of the world ADS is not supported, use delta ADS",
        ))
    }

    type DeltaAggregatedResourcesStream =
        ReceiverStream<std::result::Result<discovery::DeltaDiscoveryResponse, Status>>;

    async fn delta_aggregated_resources(
        &self,
        request: Request<Streaming<discovery::DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        let ctx = stream_context(&request);
        let cancel = ctx.cancel.clone();
        let (sender, receiver) = mpsc::channel(RESPONSE_CHANNEL_BUFFER_SIZE);

        let requests = TonicRequestStream {
            inbound: request.into_inner(),
            codec: self.codec,
        };
        let sink = TonicResponseSink {
            sender: sender.clone(),
            codec: self.codec,
        };

        let server = self.server.clone();
        tokio::spawn(async move {
            let serve = server.stream_deltas(ctx, requests, sink);
            tokio::pin!(serve);

            // tonic drops the receiver once the client goes away.
            let result = tokio::select! {
                result = &mut serve => result,
                _ = sender.closed() => {
                    cancel.cancel();
                    serve.await
                }
            };
            if let Err(e) = result {
                let _ = sender.send(Err(e.into())).await;
            }
        });

        Ok(Response::new(ReceiverStream::new(receiver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerConfig;
    use discovery::aggregated_discovery_service_client::AggregatedDiscoveryServiceClient;
    use envoy_types::pb::envoy::config::core::v3::Node;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::Code;

    async fn start_server(server: Arc<DiscoveryServer>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(AdsService::new(server).into_server())
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        addr
    }

    #[test]
    fn test_stream_context_from_metadata() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("authorization", "Bearer abc".parse().unwrap());
        let ctx = stream_context(&request);
        assert_eq!(ctx.metadata.get("authorization").map(String::as_str), Some("Bearer abc"));
        assert_eq!(ctx.peer(), "0.0.0.0");
    }

    #[tokio::test]
    async fn test_missing_node_is_invalid_argument() {
        let server = DiscoveryServer::builder(ServerConfig::default()).build();
        server.set_ready();
        let addr = start_server(server).await;

        let mut client = AggregatedDiscoveryServiceClient::connect(format!("http://{addr}"))
            .await
            .unwrap();
        let request = discovery::DeltaDiscoveryRequest {
            type_url: "type.googleapis.com/envoy.config.cluster.v3.Cluster".to_string(),
            node: Some(Node::default()),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(1);
        tx.send(request).await.unwrap();

        let mut inbound = client
            .delta_aggregated_resources(ReceiverStream::new(rx))
            .await
            .unwrap()
            .into_inner();
        let status = inbound.message().await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "missing node information");
    }

    #[tokio::test]
    async fn test_state_of_the_world_is_unimplemented() {
        let server = DiscoveryServer::builder(ServerConfig::default()).build();
        let addr = start_server(server).await;

        let mut client = AggregatedDiscoveryServiceClient::connect(format!("http://{addr}"))
            .await
            .unwrap();
        let status = client
            .stream_aggregated_resources(tokio_stream::iter(Vec::<discovery::DiscoveryRequest>::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);
    }
}
