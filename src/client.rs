use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use kv_server::command::{Command, PROMPT, SEED};
use kv_server::config::ClientArgs;
use kv_server::{logging, CallResult, ClientError, RemoteStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

fn response_text(response: CallResult) -> String {
    match response {
        Ok(text) => text,
        Err(usage) => usage.to_string(),
    }
}

async fn execute(store: &RemoteStore, command: &Command) -> Result<String, ClientError> {
    Ok(match command {
        Command::Put { key, value } => response_text(store.insert(key, value).await?),
        Command::Get { key } => response_text(store.lookup(key).await?),
        Command::Delete { key } => response_text(store.delete(key).await?),
        Command::Show => store.dump().await?,
        Command::Exit => String::new(),
    })
}

/// Write the sample entries so a fresh server has something to show.
async fn pre_populate(store: &RemoteStore) {
    info!("pre-populating the key-value store with initial data");
    println!("Pre-populating the key-value store with initial data...");

    for (key, value) in SEED {
        match store.insert(key, value).await {
            Ok(response) => {
                let response = response_text(response);
                info!(key, value, %response, "executed seed insert");
                println!("Executed: PUT {key} {value} | Response: {response}");
            }
            Err(e) => {
                error!(error = %e, "error during pre-population");
                println!("ERROR: Unable to pre-populate the store.");
                return;
            }
        }
    }

    info!("pre-population completed");
    println!("Pre-population completed.");
}

async fn repl(store: &RemoteStore) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{PROMPT}");
        std::io::stdout().flush()?;

        // End of input behaves like `exit`.
        let Some(input) = lines.next_line().await? else {
            break;
        };

        let command = match Command::parse(&input) {
            Ok(Command::Exit) => break,
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match execute(store, &command).await {
            Ok(response) => {
                info!(command = input.trim(), %response, "executed command");
                println!("Server response: {response}");
            }
            Err(e) => {
                error!(command = input.trim(), error = %e, "error executing command");
                println!("ERROR: {e}");
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = ClientArgs::parse();
    let log_guard = logging::init(&args.log_config());
    let addr = args.server_addr();

    let store = match RemoteStore::connect(addr, &args.service).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "client exception");
            eprintln!("Client exception: {e}");
            drop(log_guard);
            return ExitCode::FAILURE;
        }
    };
    println!("Connected to the server at {}.", store.addr());

    if !args.no_seed {
        pre_populate(&store).await;
    }

    let code = match repl(&store).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "failed to read input");
            ExitCode::FAILURE
        }
    };

    println!("Client is shutting down...");
    info!("client is shutting down");
    drop(log_guard);
    code
}
