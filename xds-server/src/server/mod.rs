//! The delta discovery server.
//!
//! [`DiscoveryServer`] accepts delta streams, runs one actor per stream and
//! fans push requests out to every connected proxy.
//!
//! Each stream is served by two tasks:
//!
//! - a receive loop reading requests from the transport and forwarding them
//!   on a channel of capacity one, and
//! - the main loop (the task that called [`DiscoveryServer::stream_deltas`])
//!   selecting over that channel, the connection's push channel and its stop
//!   signal.
//!
//! The main loop's select is unbiased: when a request and a push are both
//! ready, either may be handled first. Requests are handled in arrival order
//! and pushes in the order they were queued.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::generator::GeneratorRegistry;
use crate::message::DeltaDiscoveryRequest;
use crate::model::types::HEALTH_INFO_TYPE;
use crate::model::{Event, Proxy, PushContext, PushRequest};
use crate::transport::{RequestStream, ResponseSink, StreamContext};

pub mod auth;
pub mod config;
pub(crate) mod connection;
mod delta;
pub mod gate;
pub mod rate_limit;

use auth::Authenticator;
use config::ServerConfig;
use connection::{Connection, ConnectionHandle, Registration, connection_id};
use gate::{DefaultPushGate, ProxyNeedsPush};
use rate_limit::{RequestLimiter, TokenBucket};

/// Builder for [`DiscoveryServer`].
pub struct DiscoveryServerBuilder {
    config: ServerConfig,
    generators: GeneratorRegistry,
    authenticators: Vec<Arc<dyn Authenticator>>,
    limiter: Option<Arc<dyn RequestLimiter>>,
    gate: Arc<dyn ProxyNeedsPush>,
}

impl fmt::Debug for DiscoveryServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryServerBuilder")
            .field("config", &self.config)
            .field("generators", &self.generators)
            .field("authenticators", &self.authenticators.len())
            .field("rate_limited", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl DiscoveryServerBuilder {
    /// Create a builder from `config`.
    ///
    /// Streams are rate limited with a [`TokenBucket`] built from
    /// `config.rate_limit()`, and pushes are filtered by [`DefaultPushGate`].
    pub fn new(config: ServerConfig) -> Self {
        let limiter = config
            .rate_limit()
            .map(|limit| Arc::new(TokenBucket::new(limit)) as Arc<dyn RequestLimiter>);
        Self {
            config,
            generators: GeneratorRegistry::new(),
            authenticators: Vec::new(),
            limiter,
            gate: Arc::new(DefaultPushGate),
        }
    }

    /// Set the generators.
    pub fn generators(mut self, generators: GeneratorRegistry) -> Self {
        self.generators = generators;
        self
    }

    /// Add an authenticator. Authenticators are tried in the order added.
    pub fn authenticator(mut self, authenticator: impl Authenticator) -> Self {
        self.authenticators.push(Arc::new(authenticator));
        self
    }

    /// Replace the rate limiter.
    pub fn rate_limiter(mut self, limiter: impl RequestLimiter) -> Self {
        self.limiter = Some(Arc::new(limiter));
        self
    }

    /// Replace the push gate.
    pub fn push_gate(mut self, gate: impl ProxyNeedsPush) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    /// Build the server. It refuses streams until [`DiscoveryServer::set_ready`]
    /// is called.
    pub fn build(self) -> Arc<DiscoveryServer> {
        Arc::new(DiscoveryServer {
            config: self.config,
            generators: self.generators,
            authenticators: self.authenticators,
            limiter: self.limiter,
            gate: self.gate,
            push_context: ArcSwap::from_pointee(PushContext::default()),
            clients: DashMap::new(),
            ready: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }
}

/// Serves delta discovery streams.
pub struct DiscoveryServer {
    config: ServerConfig,
    generators: GeneratorRegistry,
    authenticators: Vec<Arc<dyn Authenticator>>,
    limiter: Option<Arc<dyn RequestLimiter>>,
    gate: Arc<dyn ProxyNeedsPush>,
    /// Snapshot new connections start from.
    push_context: ArcSwap<PushContext>,
    /// Connections registered for push fan-out, by connection id.
    clients: DashMap<String, ConnectionHandle>,
    ready: AtomicBool,
    shutdown: CancellationToken,
}

impl fmt::Debug for DiscoveryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryServer")
            .field("config", &self.config)
            .field("connections", &self.clients.len())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

/// Handed from the receive loop to the main loop once the first request
/// identified the proxy.
struct Initialized {
    conn_id: String,
    proxy: Arc<Proxy>,
}

/// The receive loop's ends of a stream's channels.
struct ReceiveChannels {
    requests: mpsc::Sender<DeltaDiscoveryRequest>,
    errors: oneshot::Sender<Error>,
    initialized: oneshot::Sender<Initialized>,
}

impl DiscoveryServer {
    /// Create a builder.
    pub fn builder(config: ServerConfig) -> DiscoveryServerBuilder {
        DiscoveryServerBuilder::new(config)
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start accepting streams.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Returns true once [`set_ready`](Self::set_ready) was called.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// The snapshot new connections start from.
    pub fn push_context(&self) -> Arc<PushContext> {
        self.push_context.load_full()
    }

    /// Replace the snapshot new connections start from without pushing.
    pub fn update_push_context(&self, push: Arc<PushContext>) {
        self.push_context.store(push);
    }

    /// Ids of the connections currently registered, sorted.
    pub fn connections(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// The proxy behind a registered connection.
    pub fn proxy(&self, conn_id: &str) -> Option<Arc<Proxy>> {
        self.clients.get(conn_id).map(|handle| handle.proxy.clone())
    }

    /// Close every stream. Streams opened afterwards close immediately.
    pub fn shutdown(&self) {
        info!("ADS: shutting down {} connections", self.clients.len());
        self.shutdown.cancel();
    }

    /// Deliver `request` to every registered connection and wait until each
    /// has handled it.
    ///
    /// A full push also becomes the snapshot new connections start from.
    /// Returns the number of connections the push was delivered to.
    pub async fn push(&self, request: PushRequest) -> usize {
        let request = Arc::new(request);
        if request.full {
            self.push_context.store(request.push.clone());
        }

        // One delivery task per connection.
        let handles: Vec<ConnectionHandle> =
            self.clients.iter().map(|entry| entry.value().clone()).collect();
        let mut deliveries = JoinSet::new();
        for handle in handles {
            let (event, done) = Event::new(request.clone());
            deliveries.spawn(async move {
                if !handle.send(event).await {
                    debug!("ADS: {} closed before push was delivered", handle.conn_id);
                    return false;
                }
                let _ = done.await;
                true
            });
        }

        let mut delivered = 0;
        while let Some(result) = deliveries.join_next().await {
            match result {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => warn!("ADS: push delivery task failed: {e}"),
            }
        }
        debug!(
            "ADS: push {} ({}) delivered to {delivered} connections",
            request.push.push_version, request.reason
        );
        delivered
    }

    /// Serve one delta stream until it ends.
    ///
    /// Returns `Ok(())` on a clean close (client finished, stream cancelled,
    /// server shut down) and the error that terminated the stream otherwise.
    pub async fn stream_deltas<R, S>(
        self: &Arc<Self>,
        ctx: StreamContext,
        requests: R,
        sink: S,
    ) -> Result<()>
    where
        R: RequestStream,
        S: ResponseSink,
    {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }

        let peer = ctx.peer();
        if let Some(limiter) = &self.limiter {
            if let Err(e) = limiter.wait(&ctx).await {
                warn!("ADS: {peer:?} exceeded rate limit: {e}");
                return Err(Error::RateLimited(e.to_string()));
            }
        }

        let identities = auth::authenticate(&self.authenticators, &ctx)?;
        match &identities {
            Some(ids) => debug!("Authenticated XDS: {peer} with identity {ids:?}"),
            None => debug!("Unauthenticated XDS: {peer}"),
        }

        // Stops both loops on client cancellation, server shutdown, or when
        // this function returns.
        let stop = self.shutdown.child_token();
        let _stop_on_exit = stop.clone().drop_guard();
        tokio::spawn({
            let stop = stop.clone();
            let cancel = ctx.cancel.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => stop.cancel(),
                    _ = stop.cancelled() => {}
                }
            }
        });

        let (request_tx, mut request_rx) = mpsc::channel(1);
        let (error_tx, mut error_rx) = oneshot::channel();
        let (init_tx, init_rx) = oneshot::channel();
        tokio::spawn(self.clone().receive_delta(
            requests,
            identities,
            peer.clone(),
            stop.clone(),
            ReceiveChannels {
                requests: request_tx,
                errors: error_tx,
                initialized: init_tx,
            },
        ));

        let initialized = tokio::select! {
            initialized = init_rx => initialized,
            _ = stop.cancelled() => return Ok(()),
        };
        let Ok(Initialized { conn_id, proxy }) = initialized else {
            // The receive loop ended before the proxy identified itself.
            return match (&mut error_rx).await {
                Ok(e) => Err(e),
                Err(_) => Ok(()),
            };
        };

        let mut con = Connection::new(
            conn_id,
            peer,
            proxy,
            sink,
            self.config.send_timeout(),
            stop.clone(),
        );
        let (push_tx, mut push_rx) = mpsc::channel(self.config.push_channel_capacity());
        let _registration = Registration::new(&self.clients, con.handle(push_tx));

        let result = loop {
            tokio::select! {
                request = request_rx.recv() => match request {
                    Some(request) => {
                        if let Err(e) = self.process_delta_request(&mut con, request).await {
                            break Err(e);
                        }
                    }
                    // The receive loop is gone; it left its error, if any.
                    None => break match error_rx.try_recv() {
                        Ok(e) => Err(e),
                        Err(_) => Ok(()),
                    },
                },
                Some(event) = push_rx.recv() => {
                    let Event { push_request, done } = event;
                    let result = self.push_connection_delta(&mut con, push_request).await;
                    drop(done);
                    if let Err(e) = result {
                        break Err(e);
                    }
                }
                _ = stop.cancelled() => break Ok(()),
            }
        };

        let elapsed = con.connected_at().elapsed();
        match &result {
            Ok(()) => info!(
                "ADS: {:?} {} closed after {elapsed:?}",
                con.peer(),
                con.id()
            ),
            Err(e) if e.is_expected_close() => info!(
                "ADS: {:?} {} terminated: {e}",
                con.peer(),
                con.id()
            ),
            Err(e) => error!(
                "ADS: {:?} {} terminated with error: {e}",
                con.peer(),
                con.id()
            ),
        }
        result
    }

    /// Read requests until the stream ends, forwarding them to the main loop.
    ///
    /// The first real request initializes the proxy. Errors other than an
    /// expected close are left on the error channel for the main loop.
    async fn receive_delta<R: RequestStream>(
        self: Arc<Self>,
        mut requests: R,
        mut identities: Option<Vec<String>>,
        peer: String,
        stop: CancellationToken,
        channels: ReceiveChannels,
    ) {
        let ReceiveChannels {
            requests: request_tx,
            errors,
            initialized,
        } = channels;
        let mut initialized = Some(initialized);
        let mut conn_id = String::new();

        loop {
            let received = tokio::select! {
                received = requests.recv() => received,
                _ = stop.cancelled() => return,
            };
            let request = match received {
                Ok(Some(request)) => request,
                Ok(None) => {
                    info!("ADS: {peer:?} {conn_id} terminated");
                    return;
                }
                Err(e) if e.is_expected_close() => {
                    info!("ADS: {peer:?} {conn_id} terminated");
                    return;
                }
                Err(e) => {
                    error!("ADS: {peer:?} {conn_id} terminated with error: {e}");
                    let _ = errors.send(e);
                    return;
                }
            };

            // Probes may arrive before the proxy's first real request.
            if initialized.is_some() && request.type_url == HEALTH_INFO_TYPE {
                warn!("ADS: {peer:?} send health check probe before normal xDS request");
                continue;
            }
            if let Some(init_tx) = initialized.take() {
                let Some(node) = request.node.as_ref().filter(|node| !node.id.is_empty()) else {
                    let _ = errors.send(Error::MissingNode);
                    return;
                };
                let proxy = Arc::new(Proxy::new(node, identities.take(), self.push_context()));
                conn_id = connection_id(&node.id);
                let init = Initialized {
                    conn_id: conn_id.clone(),
                    proxy,
                };
                if init_tx.send(init).is_err() {
                    return;
                }
                info!("ADS: new delta connection for node:{conn_id}");
            }

            tokio::select! {
                sent = request_tx.send(request) => {
                    if sent.is_err() {
                        return;
                    }
                }
                _ = stop.cancelled() => {
                    info!("ADS: {peer:?} {conn_id} terminated with stream closed");
                    return;
                }
            }
        }
    }
}
