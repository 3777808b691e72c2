//! Command-line configuration for both binaries.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

use crate::SERVICE_NAME;

/// Default cap on concurrently served connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;
/// Default cap on channels opened from a single peer IP.
pub const DEFAULT_MAX_CHANNELS_PER_IP: u32 = 16;

#[derive(Parser, Debug)]
#[command(name = "kv-server")]
#[command(about = "Remote in-memory key-value store")]
pub struct ServerArgs {
    /// Port to listen on
    pub port: u16,

    /// Address to bind to
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Name the store is registered under
    #[arg(long, default_value = SERVICE_NAME)]
    pub service: String,

    /// Maximum number of concurrent client connections
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Maximum number of connections from one IP address
    #[arg(long, default_value_t = DEFAULT_MAX_CHANNELS_PER_IP)]
    pub max_channels_per_ip: u32,

    /// Directory for the server log file
    #[arg(long, default_value = ".")]
    pub log_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl ServerArgs {
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            addr: SocketAddr::new(self.host, self.port),
            service_name: self.service.clone(),
            max_connections: self.max_connections,
            max_channels_per_ip: self.max_channels_per_ip,
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            dir: Some(self.log_dir.clone()),
            file_prefix: "server".to_string(),
            console: true,
            debug: self.debug,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "Interactive client for the remote key-value store")]
pub struct ClientArgs {
    /// Host the server is running on
    pub host: IpAddr,

    /// Port the server is listening on
    pub port: u16,

    /// Name of the service to look up
    #[arg(long, default_value = SERVICE_NAME)]
    pub service: String,

    /// Skip pre-populating the store with sample data
    #[arg(long)]
    pub no_seed: bool,

    /// Directory for the client log file
    #[arg(long, default_value = ".")]
    pub log_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl ClientArgs {
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            dir: Some(self.log_dir.clone()),
            file_prefix: "client".to_string(),
            // Keep the prompt readable; the client logs to its file only.
            console: false,
            debug: self.debug,
        }
    }
}

/// Settings for a [`crate::Endpoint`].
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    pub addr: SocketAddr,
    pub service_name: String,
    pub max_connections: usize,
    pub max_channels_per_ip: u32,
}

impl EndpointConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            service_name: SERVICE_NAME.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_channels_per_ip: DEFAULT_MAX_CHANNELS_PER_IP,
        }
    }
}

/// Settings for [`crate::logging::init`].
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Where to write `<file_prefix>.log`; `None` logs to the console only.
    pub dir: Option<PathBuf>,
    pub file_prefix: String,
    pub console: bool,
    pub debug: bool,
}
