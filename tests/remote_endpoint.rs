//! End-to-end tests against a real endpoint on loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use kv_server::config::EndpointConfig;
use kv_server::{ClientError, Endpoint, EndpointError, Registry, RemoteStore, Store, UsageError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    registry: Registry,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), EndpointError>>,
}

impl Running {
    async fn shutdown(self) -> Result<(), EndpointError> {
        let _ = self.stop.send(());
        self.handle.await.expect("serve task panicked")
    }
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn start(config: EndpointConfig) -> Running {
    let registry = Registry::new();
    let endpoint = Endpoint::bind(config, Arc::new(Store::new()), registry.clone())
        .await
        .expect("bind failed");
    let addr = endpoint.local_addr();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(endpoint.serve(async {
        let _ = stopped.await;
    }));
    Running {
        addr,
        registry,
        stop,
        handle,
    }
}

async fn connect(addr: SocketAddr) -> RemoteStore {
    RemoteStore::connect(addr, kv_server::SERVICE_NAME)
        .await
        .expect("connect failed")
}

#[tokio::test(flavor = "multi_thread")]
async fn apple_scenario() {
    let server = start(EndpointConfig::new(loopback())).await;
    let store = connect(server.addr).await;

    assert_eq!(
        store.insert("apple", "red").await.unwrap(),
        Ok("OK: Key added successfully.".to_string())
    );
    assert_eq!(
        store.insert("apple", "green").await.unwrap(),
        Ok("ERROR: Key already exists.".to_string())
    );
    assert_eq!(store.lookup("apple").await.unwrap(), Ok("OK: red".to_string()));
    assert_eq!(
        store.delete("apple").await.unwrap(),
        Ok("OK: Key deleted successfully.".to_string())
    );
    assert_eq!(
        store.lookup("apple").await.unwrap(),
        Ok("ERROR: Key not found.".to_string())
    );
    assert_eq!(
        store.delete("apple").await.unwrap(),
        Ok("ERROR: Key does not exist.".to_string())
    );
    assert_eq!(store.dump().await.unwrap(), "The key-value store is empty.");

    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn dump_lists_every_pair_once() {
    let server = start(EndpointConfig::new(loopback())).await;
    let store = connect(server.addr).await;

    for i in 0..10 {
        store.insert(&format!("k{i}"), &format!("v{i}")).await.unwrap().unwrap();
    }

    let listing = store.dump().await.unwrap();
    let mut lines: Vec<&str> = listing.lines().collect();
    lines.sort_unstable();
    let mut expected: Vec<String> = (0..10).map(|i| format!("k{i} : v{i}")).collect();
    expected.sort_unstable();
    assert_eq!(lines, expected);

    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_inserts_have_one_winner() {
    let server = start(EndpointConfig::new(loopback())).await;

    let mut clients = Vec::new();
    for _ in 0..4 {
        clients.push(connect(server.addr).await);
    }

    let calls = clients.iter().flat_map(|client| {
        (0..8).map(move |i| async move { client.insert("contested", &format!("value{i}")).await })
    });
    let results = join_all(calls).await;
    assert_eq!(results.len(), 32);

    let texts: Vec<String> = results
        .into_iter()
        .map(|r| r.expect("transport failure").expect("usage error"))
        .collect();
    let wins = texts
        .iter()
        .filter(|t| *t == "OK: Key added successfully.")
        .count();
    let dupes = texts
        .iter()
        .filter(|t| *t == "ERROR: Key already exists.")
        .count();
    assert_eq!(wins, 1);
    assert_eq!(dupes, 31);

    let value = clients[0].lookup("contested").await.unwrap().unwrap();
    assert!(value.starts_with("OK: value"));

    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_arguments_are_usage_errors() {
    let server = start(EndpointConfig::new(loopback())).await;
    let store = connect(server.addr).await;

    assert_eq!(store.insert("k", "").await.unwrap(), Err(UsageError::Insert));
    assert_eq!(store.insert("", "v").await.unwrap(), Err(UsageError::Insert));
    assert_eq!(store.lookup("").await.unwrap(), Err(UsageError::Lookup));
    assert_eq!(store.delete("").await.unwrap(), Err(UsageError::Delete));
    assert_eq!(store.dump().await.unwrap(), "The key-value store is empty.");

    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_service_name_is_a_transport_error() {
    let server = start(EndpointConfig::new(loopback())).await;

    let err = RemoteStore::connect(server.addr, "SomethingElse")
        .await
        .err()
        .expect("connect should fail");
    match err {
        ClientError::NameNotFound { requested, found, .. } => {
            assert_eq!(requested, "SomethingElse");
            assert_eq!(found, "KeyValueStore");
        }
        other => panic!("unexpected error: {other}"),
    }

    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_endpoint_is_a_transport_error() {
    // Grab a free port, then close it again.
    let addr = std::net::TcpListener::bind(loopback())
        .unwrap()
        .local_addr()
        .unwrap();

    let err = RemoteStore::connect(addr, kv_server::SERVICE_NAME)
        .await
        .err()
        .expect("connect should fail");
    assert!(matches!(err, ClientError::Connect { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn bind_fails_when_port_is_taken() {
    let occupied = std::net::TcpListener::bind(loopback()).unwrap();
    let addr = occupied.local_addr().unwrap();

    let err = Endpoint::bind(EndpointConfig::new(addr), Arc::new(Store::new()), Registry::new())
        .await
        .err()
        .expect("bind should fail");
    assert!(matches!(err, EndpointError::Bind { addr: a, .. } if a == addr));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_service_name_releases_the_port() {
    let registry = Registry::new();
    let first = Endpoint::bind(EndpointConfig::new(loopback()), Arc::new(Store::new()), registry.clone())
        .await
        .unwrap();

    let spare = std::net::TcpListener::bind(loopback()).unwrap();
    let addr = spare.local_addr().unwrap();
    drop(spare);

    let err = Endpoint::bind(EndpointConfig::new(addr), Arc::new(Store::new()), registry.clone())
        .await
        .err()
        .expect("second registration should fail");
    assert!(matches!(err, EndpointError::NameTaken(_)));
    assert_eq!(registry.lookup(kv_server::SERVICE_NAME), Some(first.local_addr()));

    // The failed endpoint must not keep its socket.
    std::net::TcpListener::bind(addr).expect("port still held");
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_releases_port_and_name() {
    let server = start(EndpointConfig::new(loopback())).await;
    let addr = server.addr;
    let registry = server.registry.clone();
    assert_eq!(registry.lookup(kv_server::SERVICE_NAME), Some(addr));

    let store = connect(addr).await;
    store.insert("k", "v").await.unwrap().unwrap();

    server.shutdown().await.unwrap();
    assert_eq!(registry.lookup(kv_server::SERVICE_NAME), None);

    // Connections are closed along with the listener.
    let after = tokio::time::timeout(Duration::from_secs(5), store.dump())
        .await
        .expect("call after shutdown hung");
    assert!(matches!(after, Err(ClientError::Rpc(_))));

    // A new instance can take over the same port, starting empty.
    let restarted = start(EndpointConfig::new(addr)).await;
    let store = connect(restarted.addr).await;
    assert_eq!(store.lookup("k").await.unwrap(), Ok("ERROR: Key not found.".to_string()));
    restarted.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_limit_drops_extra_clients() {
    let mut config = EndpointConfig::new(loopback());
    config.max_connections = 1;
    let server = start(config).await;

    let first = connect(server.addr).await;

    let second = tokio::time::timeout(
        Duration::from_secs(5),
        RemoteStore::connect(server.addr, kv_server::SERVICE_NAME),
    )
    .await
    .expect("rejected connect hung");
    assert!(matches!(second, Err(ClientError::Rpc(_))));

    // Freeing the slot lets the next client in.
    drop(first);
    let mut admitted = None;
    for _ in 0..50 {
        if let Ok(store) = RemoteStore::connect(server.addr, kv_server::SERVICE_NAME).await {
            admitted = Some(store);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let admitted = admitted.expect("slot was never released");
    assert_eq!(admitted.dump().await.unwrap(), "The key-value store is empty.");

    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn dump_larger_than_default_frame() {
    let server = start(EndpointConfig::new(loopback())).await;
    let store = connect(server.addr).await;

    // Ten 1 MiB values push the listing past the codec's 8 MiB default.
    let value = "x".repeat(1024 * 1024);
    for i in 0..10 {
        assert_eq!(
            store.insert(&format!("k{i}"), &value).await.unwrap(),
            Ok("OK: Key added successfully.".to_string())
        );
    }

    let listing = store.dump().await.expect("dump failed in transport");
    assert!(listing.len() > 10 * 1024 * 1024);
    assert_eq!(listing.lines().count(), 10);

    // The connection survives the large reply.
    assert_eq!(
        store.lookup("k0").await.unwrap(),
        Ok(format!("OK: {value}"))
    );

    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn name_lookup_goes_through_the_registry() {
    let server = start(EndpointConfig::new(loopback())).await;

    server.registry.unbind(kv_server::SERVICE_NAME).unwrap();
    let err = RemoteStore::connect(server.addr, kv_server::SERVICE_NAME)
        .await
        .err()
        .expect("connect should fail once the name is gone");
    match err {
        ClientError::NameNotFound { found, .. } => assert_eq!(found, ""),
        other => panic!("unexpected error: {other}"),
    }

    server
        .registry
        .bind(kv_server::SERVICE_NAME, server.addr)
        .unwrap();
    connect(server.addr).await;

    server.shutdown().await.unwrap();
}
