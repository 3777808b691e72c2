use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod remote;
pub mod store;

pub use endpoint::{BoundEndpoint, Endpoint, KvService, Registry};
pub use error::{ClientError, EndpointError};
pub use remote::RemoteStore;
pub use store::{Reply, Store, StoreError, StoreResult};

/// Name the store is published under unless configured otherwise.
pub const SERVICE_NAME: &str = "KeyValueStore";

/// Largest JSON frame either end accepts. Both sides must agree or a large
/// `dump` reply tears down the client's connection.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Argument validation failure, reported by the endpoint before the store is touched.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UsageError {
    #[error("PUT command requires a key and a value.")]
    Insert,
    #[error("GET command requires a key.")]
    Lookup,
    #[error("DELETE command requires a key.")]
    Delete,
}

/// What every store operation sends back: the reply text, or the usage
/// error that stopped the call at the endpoint.
pub type CallResult = Result<String, UsageError>;

#[tarpc::service]
pub trait KeyValueStore {
    /// Insert a key-value pair if the key is absent
    async fn insert(key: String, value: String) -> CallResult;
    /// Look up the value for a key
    async fn lookup(key: String) -> CallResult;
    /// Delete a key-value pair
    async fn delete(key: String) -> CallResult;
    /// List every key-value pair
    async fn dump() -> String;
    /// Name this endpoint is registered under
    async fn service_name() -> String;
}
