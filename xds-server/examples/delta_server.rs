//! Example serving static clusters over delta ADS.
//!
//! This example shows:
//! - How to implement `ResourceGenerator` for Envoy clusters
//! - How to serve a `DiscoveryServer` with the tonic transport
//! - How to push a new snapshot to every connected proxy
//!
//! # Configuration (environment variables)
//!
//! - `XDS_ADDR`: Address to listen on (default: `0.0.0.0:18000`)
//! - `XDS_CLUSTERS`: Comma-separated cluster names to serve (default: `service-a,service-b`)
//! - `XDS_PUSH_INTERVAL_SECS`: Seconds between full pushes (default: `30`)
//! - `RUST_LOG`: Log filter (default: `info`)
//!
//! # Usage
//!
//! ```sh
//! XDS_CLUSTERS=reviews,ratings cargo run -p xds-server --example delta_server
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use prost::Message;
use tracing_subscriber::EnvFilter;

use xds_server::model::types::CLUSTER_TYPE;
use xds_server::{
    AdsService, BoxError, DiscoveryServer, Generated, GeneratorRegistry, Proxy, PushContext,
    PushRequest, Resource, ResourceAny, ResourceGenerator, ServerConfig, TriggerReason,
    WatchedResource,
};

struct Args {
    addr: SocketAddr,
    clusters: Vec<String>,
    push_interval: Duration,
}

fn parse_args() -> Result<Args, BoxError> {
    let addr = std::env::var("XDS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:18000".to_string())
        .parse()?;
    let clusters = std::env::var("XDS_CLUSTERS")
        .unwrap_or_else(|_| "service-a,service-b".to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    let push_interval = std::env::var("XDS_PUSH_INTERVAL_SECS")
        .ok()
        .map(|s| s.parse())
        .transpose()?
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30));
    Ok(Args {
        addr,
        clusters,
        push_interval,
    })
}

/// Serves one EDS cluster per configured name.
struct StaticClusters {
    names: Vec<String>,
}

impl ResourceGenerator for StaticClusters {
    fn generate(
        &self,
        _proxy: &Proxy,
        watched: &WatchedResource,
        request: &PushRequest,
    ) -> Result<Option<Generated>, BoxError> {
        let resources = self
            .names
            .iter()
            .filter(|name| watched.wildcard || watched.resource_names.contains(*name))
            .map(|name| {
                let cluster = Cluster {
                    name: name.clone(),
                    ..Default::default()
                };
                Resource::new(
                    name.clone(),
                    ResourceAny {
                        type_url: CLUSTER_TYPE.to_string(),
                        value: Bytes::from(cluster.encode_to_vec()),
                    },
                )
                .with_version(request.push.push_version.clone())
            })
            .collect();
        Ok(Some(Generated::new(resources)))
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    println!("Serving clusters {:?} on {}", args.clusters, args.addr);

    let generators = GeneratorRegistry::new().with_full(
        CLUSTER_TYPE,
        StaticClusters {
            names: args.clusters,
        },
    );
    let server = DiscoveryServer::builder(ServerConfig::new("delta-server-example"))
        .generators(generators)
        .build();
    server.update_push_context(Arc::new(PushContext::new("1")));
    server.set_ready();

    let pusher = server.clone();
    tokio::spawn(async move {
        let mut version = 1u64;
        let mut interval = tokio::time::interval(args.push_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            version += 1;
            let push = PushRequest::full(
                Arc::new(PushContext::new(version.to_string())),
                TriggerReason::GlobalUpdate,
            );
            let delivered = pusher.push(push).await;
            println!("Pushed version {version} to {delivered} connections");
        }
    });

    tonic::transport::Server::builder()
        .add_service(AdsService::new(server.clone()).into_server())
        .serve_with_shutdown(args.addr, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    server.shutdown();
    Ok(())
}
