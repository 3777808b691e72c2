//! Network endpoint publishing a [`Store`] as a tarpc service.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future;
use futures_util::StreamExt;
use tarpc::context;
use tarpc::server::{self, incoming::Incoming, Channel};
use tarpc::tokio_serde::formats::Json;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::EndpointConfig;
use crate::error::EndpointError;
use crate::store::{Store, StoreResult};
use crate::{
    CallResult, KeyValueStore, KeyValueStoreRequest, KeyValueStoreResponse, UsageError,
    MAX_FRAME_LENGTH,
};

type ServerCodec =
    Json<tarpc::ClientMessage<KeyValueStoreRequest>, tarpc::Response<KeyValueStoreResponse>>;
type Listener = tarpc::serde_transport::tcp::Incoming<
    tarpc::ClientMessage<KeyValueStoreRequest>,
    tarpc::Response<KeyValueStoreResponse>,
    ServerCodec,
    fn() -> ServerCodec,
>;

/// Name-to-address bindings for services published by this process.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    names: Arc<Mutex<HashMap<String, SocketAddr>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, name: &str, addr: SocketAddr) -> Result<(), EndpointError> {
        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        if names.contains_key(name) {
            return Err(EndpointError::NameTaken(name.to_string()));
        }
        names.insert(name.to_string(), addr);
        Ok(())
    }

    pub fn unbind(&self, name: &str) -> Result<SocketAddr, EndpointError> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| EndpointError::NotRegistered(name.to_string()))
    }

    pub fn lookup(&self, name: &str) -> Option<SocketAddr> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    /// The name bound to `addr`, if any.
    pub fn name_of(&self, addr: SocketAddr) -> Option<String> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, bound)| **bound == addr)
            .map(|(name, _)| name.clone())
    }
}

/// Per-call handler: validates arguments and forwards to the store.
#[derive(Clone)]
pub struct KvService {
    store: Arc<Store>,
    registry: Registry,
    addr: SocketAddr,
}

impl KvService {
    /// `addr` is the endpoint address the service answers for; its
    /// published name is resolved through `registry` on every lookup.
    pub fn new(store: Arc<Store>, registry: Registry, addr: SocketAddr) -> Self {
        Self {
            store,
            registry,
            addr,
        }
    }
}

fn render(result: StoreResult) -> String {
    match result {
        Ok(reply) => reply.to_string(),
        Err(err) => err.to_string(),
    }
}

fn rejected(op: &'static str, err: UsageError) -> CallResult {
    warn!(op, error = %err, "rejected call with missing arguments");
    Err(err)
}

impl KeyValueStore for KvService {
    // Need to define the future types for tarpc
    type InsertFut = future::Ready<CallResult>;
    type LookupFut = future::Ready<CallResult>;
    type DeleteFut = future::Ready<CallResult>;
    type DumpFut = future::Ready<String>;
    type ServiceNameFut = future::Ready<String>;

    fn insert(self, _: context::Context, key: String, value: String) -> Self::InsertFut {
        if key.is_empty() || value.is_empty() {
            return future::ready(rejected("insert", UsageError::Insert));
        }
        future::ready(Ok(render(self.store.insert(key, value))))
    }

    fn lookup(self, _: context::Context, key: String) -> Self::LookupFut {
        if key.is_empty() {
            return future::ready(rejected("lookup", UsageError::Lookup));
        }
        future::ready(Ok(render(self.store.lookup(&key))))
    }

    fn delete(self, _: context::Context, key: String) -> Self::DeleteFut {
        if key.is_empty() {
            return future::ready(rejected("delete", UsageError::Delete));
        }
        future::ready(Ok(render(self.store.delete(&key))))
    }

    fn dump(self, _: context::Context) -> Self::DumpFut {
        future::ready(self.store.dump().to_string())
    }

    // An empty name means nothing is registered for this endpoint any more.
    fn service_name(self, _: context::Context) -> Self::ServiceNameFut {
        future::ready(self.registry.name_of(self.addr).unwrap_or_default())
    }
}

/// Releases a connection slot when the client goes away.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Endpoint;

impl Endpoint {
    /// Listen on `config.addr` and publish the store under
    /// `config.service_name`.
    pub async fn bind(
        config: EndpointConfig,
        store: Arc<Store>,
        registry: Registry,
    ) -> Result<BoundEndpoint, EndpointError> {
        let bind_err = |source| EndpointError::Bind {
            addr: config.addr,
            source,
        };

        // JSON transport is provided by the json_transport tarpc module. It makes it easy
        // to start up a serde-powered json serialization strategy over TCP.
        let codec: fn() -> ServerCodec = Json::default;
        let mut listener: Listener = tarpc::serde_transport::tcp::listen(&config.addr, codec)
            .await
            .map_err(bind_err)?;
        listener.config_mut().max_frame_length(MAX_FRAME_LENGTH);
        let local_addr = listener.local_addr();

        registry.bind(&config.service_name, local_addr)?;
        info!(
            service = %config.service_name,
            addr = %local_addr,
            max_connections = config.max_connections,
            "server is ready and bound to registry"
        );

        Ok(BoundEndpoint {
            listener,
            local_addr,
            service: KvService::new(store, registry.clone(), local_addr),
            config,
            registry,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }
}

/// An endpoint holding its listening socket, ready to serve.
pub struct BoundEndpoint {
    listener: Listener,
    local_addr: SocketAddr,
    service: KvService,
    config: EndpointConfig,
    registry: Registry,
    active: Arc<AtomicUsize>,
}

impl BoundEndpoint {
    /// The address actually bound, which differs from the configured one
    /// when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Serve calls until `shutdown` resolves, then release the port and
    /// deregister the service.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), EndpointError>
    where
        F: Future<Output = ()>,
    {
        let BoundEndpoint {
            listener,
            local_addr,
            service,
            config,
            registry,
            active,
        } = self;

        let mut tasks = JoinSet::new();
        let max_connections = config.max_connections;

        let accept = listener
            // Ignore accept errors.
            .filter_map(|r| future::ready(r.ok()))
            .map(server::BaseChannel::with_defaults)
            .max_channels_per_key(config.max_channels_per_ip, |t| {
                t.transport()
                    .peer_addr()
                    .map(|addr| addr.ip())
                    .unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED))
            })
            .for_each(|channel| {
                // Reap connections that already finished.
                while tasks.try_join_next().is_some() {}

                let peer = channel.transport().peer_addr().ok();

                // Claim a slot first so racing accepts cannot both squeeze in.
                let previous = active.fetch_add(1, Ordering::SeqCst);
                let slot = ConnectionSlot {
                    active: active.clone(),
                };
                if previous >= max_connections {
                    warn!(
                        ?peer,
                        max_connections, "connection limit reached, rejecting new connection"
                    );
                    return future::ready(());
                }
                info!(?peer, active = previous + 1, max_connections, "client connected");

                let fut = channel.execute(service.clone().serve());
                let counter = active.clone();
                tasks.spawn(async move {
                    // Process client requests
                    fut.await;
                    drop(slot);
                    info!(
                        ?peer,
                        active = counter.load(Ordering::SeqCst),
                        max_connections,
                        "client disconnected"
                    );
                });
                future::ready(())
            });

        tokio::select! {
            _ = accept => warn!(addr = %local_addr, "listener stopped accepting connections"),
            _ = shutdown => info!(addr = %local_addr, "shutdown requested"),
        }

        // The accept stream owned the listener, so the port is free from here on.
        let in_flight = tasks.len();
        tasks.shutdown().await;
        debug!(in_flight, "closed client connections");

        match registry.unbind(&config.service_name) {
            Ok(_) => {
                info!(
                    service = %config.service_name,
                    entries = service.store.len(),
                    "server shut down gracefully"
                );
                Ok(())
            }
            Err(e) => {
                error!(service = %config.service_name, error = %e, "error during server shutdown");
                Err(e)
            }
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
