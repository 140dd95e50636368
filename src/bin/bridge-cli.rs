use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;

use script_bridge::client::{BridgeClient, ClientEvent, ClientEventKind, RequestContext};
use script_bridge::config::ClientConfig;
use script_bridge::dispatch::{Action, HandlerError};
use script_bridge::lifecycle::signals;
use script_bridge::observability::logging;
use script_bridge::protocol::{DisconnectReason, Outcome};

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Command-line client for a script-bridge server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    url: String,

    #[arg(long, default_value = "bridge-cli")]
    client_id: String,

    #[arg(long, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one request and print the response
    Send {
        /// Channel id, e.g. "demo:echo"
        channel: String,
        /// JSON payload; plain text is sent as a string
        data: Option<String>,
    },
    /// Print every "demo:message" request until Ctrl-C
    Listen,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log);

    let config = ClientConfig {
        server_url: cli.url,
        client_id: cli.client_id,
        ..ClientConfig::default()
    };
    let client = BridgeClient::new(config)?;

    match cli.command {
        Commands::Send { channel, data } => {
            let payload = match data {
                Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                None => Value::Null,
            };
            client.connect().await?;
            let response = client.send(channel.as_str(), payload).await;
            client.disconnect(DisconnectReason::Disconnect).await?;

            match response?.outcome {
                Outcome::Success(data) => println!("{}", serde_json::to_string_pretty(&data)?),
                Outcome::Failure { message, reason } => {
                    eprintln!("{reason}: {message}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Listen => {
            client.register_handler("demo:message", print_message)?;
            let lost = Arc::new(tokio::sync::Notify::new());
            let notify = lost.clone();
            client.events().on(ClientEventKind::Disconnect, move |event| {
                if let ClientEvent::Disconnect { reason } = event {
                    eprintln!("disconnected: {reason}");
                    if reason.is_version_mismatch() {
                        notify.notify_one();
                    }
                }
            });
            client.events().on(ClientEventKind::Connect, |event| {
                if let ClientEvent::Connect { session_id } = event {
                    eprintln!("connected: session {session_id}");
                }
            });

            client.connect().await?;
            tokio::select! {
                _ = signals::termination() => {
                    if let Err(e) = client.disconnect(DisconnectReason::Disconnect).await {
                        eprintln!("disconnect failed: {e}");
                    }
                }
                _ = lost.notified() => {}
            }
        }
    }

    Ok(())
}

async fn print_message(action: Action<RequestContext>) -> Result<(), HandlerError> {
    match action.data() {
        Value::String(text) => println!("{text}"),
        other => println!("{other}"),
    }
    action.respond(Value::Null);
    Ok(())
}
