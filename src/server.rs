use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kv_server::config::ServerArgs;
use kv_server::endpoint::shutdown_signal;
use kv_server::{logging, Endpoint, Registry, Store};
use tracing::{error, info};

async fn run(args: ServerArgs) -> anyhow::Result<()> {
    let store = Arc::new(Store::new());
    let registry = Registry::new();

    let endpoint = Endpoint::bind(args.endpoint_config(), store, registry)
        .await
        .context("server could not start")?;

    println!(
        "Server is ready on port {} as {}.",
        endpoint.local_addr().port(),
        endpoint.service_name()
    );

    endpoint
        .serve(shutdown_signal())
        .await
        .context("server did not shut down cleanly")?;

    println!("Server shut down gracefully.");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServerArgs::parse();
    let log_guard = logging::init(&args.log_config());

    info!(port = args.port, "starting key-value server");

    let code = match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{e:#}");
            error!(error = %message, "server exception");
            eprintln!("Server exception: {message}");
            ExitCode::FAILURE
        }
    };

    // Flush the log file before the process exits.
    drop(log_guard);
    code
}
