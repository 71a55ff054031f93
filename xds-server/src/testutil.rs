//! Mock transports and fixture generators for unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BoxError, Error, Result};
use crate::generator::{Generated, ResourceGenerator};
use crate::message::{DeltaDiscoveryRequest, DeltaDiscoveryResponse, Node, Resource, ResourceAny};
use crate::model::{Proxy, PushRequest, WatchedResource};
use crate::server::DiscoveryServer;
use crate::transport::{RequestStream, ResponseSink, StreamContext};

/// Request stream fed from a channel. Dropping the sender ends the stream
/// cleanly.
pub(crate) struct MockRequestStream {
    rx: mpsc::UnboundedReceiver<Result<DeltaDiscoveryRequest>>,
}

impl MockRequestStream {
    pub(crate) fn new() -> (mpsc::UnboundedSender<Result<DeltaDiscoveryRequest>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl RequestStream for MockRequestStream {
    async fn recv(&mut self) -> Result<Option<DeltaDiscoveryRequest>> {
        self.rx.recv().await.transpose()
    }
}

/// Response sink writing into a channel.
#[derive(Debug)]
pub(crate) struct MockResponseSink {
    tx: mpsc::UnboundedSender<DeltaDiscoveryResponse>,
    blocked: bool,
}

impl MockResponseSink {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<DeltaDiscoveryResponse>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, blocked: false }, rx)
    }

    /// A sink whose writes never complete.
    pub(crate) fn blocked() -> (Self, mpsc::UnboundedReceiver<DeltaDiscoveryResponse>) {
        let (mut sink, rx) = Self::new();
        sink.blocked = true;
        (sink, rx)
    }
}

impl ResponseSink for MockResponseSink {
    async fn send(&mut self, response: DeltaDiscoveryResponse) -> Result<()> {
        if self.blocked {
            std::future::pending::<()>().await;
        }
        self.tx.send(response).map_err(|_| Error::StreamClosed)
    }
}

pub(crate) fn resource(type_url: &str, name: &str, version: &str) -> Resource {
    Resource::new(
        name,
        ResourceAny {
            type_url: type_url.to_string(),
            value: Bytes::from(format!("{name}@{version}")),
        },
    )
    .with_version(version)
}

/// Serves every stored resource to wildcard subscribers and the subscribed
/// subset otherwise.
#[derive(Debug, Clone)]
pub(crate) struct StaticGenerator {
    type_url: String,
    resources: Arc<Mutex<BTreeMap<String, String>>>,
}

impl StaticGenerator {
    pub(crate) fn new(type_url: &str, names: &[&str]) -> Self {
        let generator = Self {
            type_url: type_url.to_string(),
            resources: Arc::default(),
        };
        for name in names {
            generator.upsert(name, "1");
        }
        generator
    }

    pub(crate) fn upsert(&self, name: &str, version: &str) {
        self.resources
            .lock()
            .insert(name.to_string(), version.to_string());
    }

    pub(crate) fn remove(&self, name: &str) {
        self.resources.lock().remove(name);
    }
}

impl ResourceGenerator for StaticGenerator {
    fn generate(
        &self,
        _proxy: &Proxy,
        watched: &WatchedResource,
        _request: &PushRequest,
    ) -> std::result::Result<Option<Generated>, BoxError> {
        let resources = self
            .resources
            .lock()
            .iter()
            .filter(|(name, _)| watched.wildcard || watched.resource_names.contains(*name))
            .map(|(name, version)| resource(&self.type_url, name, version))
            .collect();
        Ok(Some(Generated::new(resources)))
    }
}

/// Always fails.
#[derive(Debug)]
pub(crate) struct FailingGenerator;

impl ResourceGenerator for FailingGenerator {
    fn generate(
        &self,
        _proxy: &Proxy,
        _watched: &WatchedResource,
        _request: &PushRequest,
    ) -> std::result::Result<Option<Generated>, BoxError> {
        Err("snapshot unavailable".into())
    }
}

pub(crate) fn request(
    type_url: &str,
    subscribe: &[&str],
    unsubscribe: &[&str],
    nonce: &str,
) -> DeltaDiscoveryRequest {
    DeltaDiscoveryRequest {
        type_url: type_url.to_string(),
        resource_names_subscribe: subscribe.iter().map(|s| s.to_string()).collect(),
        resource_names_unsubscribe: unsubscribe.iter().map(|s| s.to_string()).collect(),
        response_nonce: nonce.to_string(),
        ..Default::default()
    }
}

pub(crate) fn first_request(node_id: &str, type_url: &str, subscribe: &[&str]) -> DeltaDiscoveryRequest {
    DeltaDiscoveryRequest {
        node: Some(Node::new(node_id)),
        ..request(type_url, subscribe, &[], "")
    }
}

/// One stream driven against a server.
pub(crate) struct TestStream {
    requests: mpsc::UnboundedSender<Result<DeltaDiscoveryRequest>>,
    responses: mpsc::UnboundedReceiver<DeltaDiscoveryResponse>,
    pub(crate) handle: JoinHandle<Result<()>>,
}

impl TestStream {
    pub(crate) fn start(server: &Arc<DiscoveryServer>, ctx: StreamContext) -> Self {
        let (requests, stream) = MockRequestStream::new();
        let (sink, responses) = MockResponseSink::new();
        let server = server.clone();
        let handle = tokio::spawn(async move { server.stream_deltas(ctx, stream, sink).await });
        Self {
            requests,
            responses,
            handle,
        }
    }

    pub(crate) fn send(&self, request: DeltaDiscoveryRequest) {
        self.requests.send(Ok(request)).unwrap();
    }

    pub(crate) fn fail(&self, error: Error) {
        self.requests.send(Err(error)).unwrap();
    }

    pub(crate) async fn recv(&mut self) -> DeltaDiscoveryResponse {
        self.responses.recv().await.expect("stream ended without a response")
    }

    /// End the request side and wait for the stream to finish.
    pub(crate) async fn close(self) -> Result<()> {
        drop(self.requests);
        self.handle.await.unwrap()
    }
}
