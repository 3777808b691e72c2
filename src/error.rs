use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failures setting up or tearing down the server side.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("service name {0:?} is already registered")]
    NameTaken(String),
    #[error("service name {0:?} is not registered")]
    NotRegistered(String),
}

/// Transport-level failures seen by a caller. Store outcomes such as a
/// missing key never show up here.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("remote call failed: {0}")]
    Rpc(#[from] tarpc::client::RpcError),
    #[error("service {requested:?} not found at {addr} (endpoint serves {found:?})")]
    NameNotFound {
        addr: SocketAddr,
        requested: String,
        found: String,
    },
}
