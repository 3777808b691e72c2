use std::net::SocketAddr;

use tarpc::{client, context};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::{CallResult, KeyValueStoreClient, MAX_FRAME_LENGTH};

pub struct RemoteStore {
    client: KeyValueStoreClient,
    addr: SocketAddr,
}

impl RemoteStore {
    /// Connect to `addr` and confirm it serves `service_name`.
    pub async fn connect(addr: SocketAddr, service_name: &str) -> Result<Self, ClientError> {
        debug!(%addr, "connecting to server");
        let mut connect = tarpc::serde_transport::tcp::connect(addr, || {
            tarpc::tokio_serde::formats::Json::default()
        });
        connect.config_mut().max_frame_length(MAX_FRAME_LENGTH);
        let transport = connect
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;

        // Create a client with default config
        let client = KeyValueStoreClient::new(client::Config::default(), transport).spawn();

        let found = client.service_name(context::current()).await?;
        if found != service_name {
            warn!(%addr, requested = service_name, %found, "service name lookup failed");
            return Err(ClientError::NameNotFound {
                addr,
                requested: service_name.to_string(),
                found,
            });
        }

        info!(%addr, service = service_name, "connected to key-value store");
        Ok(Self { client, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn insert(&self, key: &str, value: &str) -> Result<CallResult, ClientError> {
        Ok(self
            .client
            .insert(context::current(), key.to_string(), value.to_string())
            .await?)
    }

    pub async fn lookup(&self, key: &str) -> Result<CallResult, ClientError> {
        Ok(self.client.lookup(context::current(), key.to_string()).await?)
    }

    pub async fn delete(&self, key: &str) -> Result<CallResult, ClientError> {
        Ok(self.client.delete(context::current(), key.to_string()).await?)
    }

    pub async fn dump(&self) -> Result<String, ClientError> {
        Ok(self.client.dump(context::current()).await?)
    }
}
