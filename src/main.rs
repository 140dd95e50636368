//! Script Bridge server daemon
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                BRIDGE SERVER                  │
//!   GET  /new   ───────┼─▶ session registry ──▶ Session (queue,        │
//!   GET  /query ───────┼─▶   drain queue          pending, liveness)    │
//!   POST /query ───────┼─▶ dispatcher ──▶ handlers ("demo:echo", ...)   │
//!                      │                                                │
//!   stdin line  ───────┼─▶ broadcast("demo:message") ─▶ every session   │
//!                      │                                                │
//!                      │  config watcher ─▶ apply_config (hot reload)   │
//!                      │  Ctrl-C / SIGTERM ─▶ stop (disconnect all)     │
//!                      └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use script_bridge::config::{load_config, BridgeConfig, ConfigWatcher};
use script_bridge::dispatch::{Action, HandlerError};
use script_bridge::lifecycle::signals;
use script_bridge::observability::{logging, metrics};
use script_bridge::server::{BridgeServer, ServerEvent, ServerEventKind, Session};

#[derive(Parser)]
#[command(name = "script-bridge")]
#[command(about = "HTTP long-poll request/response bridge server", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => load_config(path)?,
        None => BridgeConfig::default(),
    };
    let mut config = loaded.clone();
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_tracing(&config.observability.log_filter);
    tracing::info!("script-bridge v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_interval_ticks = config.session.request_interval_ticks,
        timeout_multiplier = config.session.timeout_multiplier,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => match metrics::init_metrics() {
                Ok(handle) => metrics::start_metrics_server(addr, handle).await?,
                Err(e) => tracing::error!(error = %e, "Failed to install metrics recorder"),
            },
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = Arc::new(BridgeServer::new(&config));
    log_events(&server);
    server.register_handler("demo:echo", echo)?;

    // Keep the watcher alive for the life of the process.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, loaded);
            let watcher = watcher.run()?;
            let server = server.clone();
            tokio::spawn(async move {
                while updates.changed().await.is_ok() {
                    let config = updates.borrow_and_update().clone();
                    server.apply_config(&config);
                }
            });
            Some(watcher)
        }
        None => None,
    };

    server.start().await?;
    tokio::spawn(broadcast_stdin(server.clone()));

    signals::termination().await;
    server.stop().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Replies with the request payload.
async fn echo(action: Action<Arc<Session>>) -> Result<(), HandlerError> {
    let data = action.data().clone();
    tracing::debug!(session_id = %action.context().id(), "Echo");
    action.respond(data);
    Ok(())
}

/// Broadcast every stdin line on `demo:message`. Lines that parse as JSON
/// are sent as-is, anything else as a string.
async fn broadcast_stdin(server: Arc<BridgeServer>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let payload = serde_json::from_str(&line).unwrap_or(Value::String(line));
        match server.broadcast("demo:message", payload, None).await {
            Ok(responses) => {
                let failed = responses.iter().filter(|r| r.outcome.is_error()).count();
                tracing::info!(sessions = responses.len(), failed, "Broadcast delivered");
            }
            Err(e) => tracing::error!(error = %e, "Broadcast rejected"),
        }
    }
}

fn log_events(server: &BridgeServer) {
    let events = server.events();
    events.on(ServerEventKind::ClientConnect, |event| {
        if let ServerEvent::ClientConnect { session } = event {
            tracing::info!(
                session_id = %session.id(),
                client_id = session.client_id().as_deref().unwrap_or(""),
                "Client connected"
            );
        }
    });
    events.on(ServerEventKind::ClientDisconnect, |event| {
        if let ServerEvent::ClientDisconnect { session, reason } = event {
            tracing::info!(session_id = %session.id(), reason = %reason, "Client disconnected");
        }
    });
    events.on(ServerEventKind::Error, |event| {
        if let ServerEvent::Error { error } = event {
            tracing::warn!(error = %error, "Bridge error");
        }
    });
}
