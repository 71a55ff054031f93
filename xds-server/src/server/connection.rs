//! One delta discovery stream and the handle push fan-out uses to reach it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::message::DeltaDiscoveryResponse;
use crate::model::types::{is_debug_type, short_type};
use crate::model::{Event, Proxy};
use crate::transport::ResponseSink;

/// Process-wide counter making connection ids unique per node.
static CONNECTION_NUMBER: AtomicU64 = AtomicU64::new(0);

/// Build the id of a new connection for `node_id`.
pub(crate) fn connection_id(node_id: &str) -> String {
    let n = CONNECTION_NUMBER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{node_id}-{n}")
}

/// The state a stream's main loop owns once the proxy is initialized.
#[derive(Debug)]
pub(crate) struct Connection<S> {
    conn_id: String,
    peer: String,
    proxy: Arc<Proxy>,
    sink: S,
    connected_at: Instant,
    send_timeout: Option<Duration>,
    stop: CancellationToken,
}

impl<S: ResponseSink> Connection<S> {
    pub(crate) fn new(
        conn_id: String,
        peer: String,
        proxy: Arc<Proxy>,
        sink: S,
        send_timeout: Option<Duration>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            conn_id,
            peer,
            proxy,
            sink,
            connected_at: Instant::now(),
            send_timeout,
            stop,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.conn_id
    }

    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    pub(crate) fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    pub(crate) fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Handle registered for push fan-out.
    pub(crate) fn handle(&self, push_tx: mpsc::Sender<Event>) -> ConnectionHandle {
        ConnectionHandle {
            conn_id: self.conn_id.clone(),
            proxy: self.proxy.clone(),
            push_tx,
            stop: self.stop.clone(),
        }
    }

    /// Write `response` and, once it is on the wire, record the nonce sent
    /// for its type.
    ///
    /// `new_names` replaces the tracked resource names when the generator
    /// recomputes them on every push.
    pub(crate) async fn send_delta(
        &mut self,
        response: DeltaDiscoveryResponse,
        new_names: Option<BTreeSet<String>>,
    ) -> Result<()> {
        let type_url = response.type_url.clone();
        let nonce = response.nonce.clone();

        let send = self.sink.send(response);
        let result = match self.send_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, send).await {
                Ok(result) => result,
                Err(_) => {
                    info!(
                        conn_id = %self.conn_id,
                        "timeout writing {}",
                        short_type(&type_url)
                    );
                    Err(Error::SendTimeout(timeout))
                }
            },
            None => send.await,
        };
        result?;

        if !is_debug_type(&type_url) {
            self.proxy.update_watched_resource(&type_url, |watched| {
                if let Some(watched) = watched {
                    if let Some(names) = new_names {
                        watched.resource_names = names;
                    }
                    watched.nonce_sent = nonce;
                    watched.last_send_time = Some(Instant::now());
                }
            });
        }
        Ok(())
    }
}

/// What push fan-out holds for a registered connection.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionHandle {
    pub(crate) conn_id: String,
    pub(crate) proxy: Arc<Proxy>,
    pub(crate) push_tx: mpsc::Sender<Event>,
    pub(crate) stop: CancellationToken,
}

impl ConnectionHandle {
    /// Queue `event`, giving up if the connection stops first.
    ///
    /// Returns false when the event was not delivered; its completion handle
    /// is dropped in that case, which releases the producer.
    pub(crate) async fn send(&self, event: Event) -> bool {
        tokio::select! {
            result = self.push_tx.send(event) => result.is_ok(),
            _ = self.stop.cancelled() => false,
        }
    }
}

/// Keeps a connection registered for push fan-out until dropped.
#[derive(Debug)]
pub(crate) struct Registration<'a> {
    clients: &'a DashMap<String, ConnectionHandle>,
    conn_id: String,
}

impl<'a> Registration<'a> {
    pub(crate) fn new(clients: &'a DashMap<String, ConnectionHandle>, handle: ConnectionHandle) -> Self {
        let conn_id = handle.conn_id.clone();
        clients.insert(conn_id.clone(), handle);
        Self { clients, conn_id }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.clients.remove(&self.conn_id).is_some() {
            debug!(conn_id = %self.conn_id, "connection deregistered");
        }
    }
}
