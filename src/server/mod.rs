//! Server side of the bridge.
//!
//! # Data Flow
//! ```text
//! GET /new     → Session::create → {sessionId, requestIntervalTicks}
//! GET /query   → Session::drain_queue → [ServerRequest...]
//! POST /query  → Request  → Dispatcher::handle → ServerResponse
//!              → Response → Session::resolve → pending request completes
//!
//! Session::send → queue + pending entry → (next poll) → client → resolve | timeout
//! ```
//!
//! # Design Decisions
//! - The session table belongs to one server instance, so several can share a process
//! - Protocol errors are structured responses, never HTTP failures
//! - Session timing lives behind an `ArcSwap` so it can be reloaded

pub mod events;
pub(crate) mod internal;
pub(crate) mod liveness;
pub(crate) mod pending;
pub mod registry;
pub mod session;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::{BridgeConfig, ListenerConfig, SessionConfig};
use crate::dispatch::{Dispatcher, Handler};
use crate::events::EventBus;
use crate::lifecycle::Shutdown;
use crate::protocol::{ChannelIdError, ClientResponse, DisconnectReason, IntoChannelId, SessionId};

pub use events::{BridgeError, ServerEvent, ServerEventKind};
pub use registry::SessionRegistry;
pub use session::{PingError, PingResult, Session};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,
}

/// State shared by the HTTP handlers, the sessions and the public API.
pub(crate) struct ServerCore {
    pub(crate) registry: SessionRegistry,
    pub(crate) dispatcher: Dispatcher<Arc<Session>>,
    pub(crate) events: Arc<EventBus<ServerEvent>>,
    pub(crate) settings: ArcSwap<SessionConfig>,
}

impl ServerCore {
    pub(crate) fn new(settings: SessionConfig) -> Arc<Self> {
        let events = Arc::new(EventBus::new());
        let hook_events = events.clone();
        let dispatcher = Dispatcher::new("server").with_error_hook(move |error| {
            hook_events.emit(ServerEvent::Error {
                error: error.into(),
            });
        });
        internal::register(&dispatcher);

        Arc::new(Self {
            registry: SessionRegistry::new(),
            dispatcher,
            events,
            settings: ArcSwap::from_pointee(settings),
        })
    }
}

struct Running {
    address: SocketAddr,
    shutdown: Shutdown,
    task: JoinHandle<std::io::Result<()>>,
}

/// A bridge server: owns the HTTP endpoints and every session.
pub struct BridgeServer {
    core: Arc<ServerCore>,
    listener: ListenerConfig,
    running: Mutex<Option<Running>>,
}

impl BridgeServer {
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_settings(config.listener.clone(), config.session.clone())
    }

    pub fn with_settings(listener: ListenerConfig, session: SessionConfig) -> Self {
        Self {
            core: ServerCore::new(session),
            listener,
            running: Mutex::new(None),
        }
    }

    /// Bind the configured address and start serving.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }
        let address: SocketAddr = self
            .listener
            .bind_address
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.listener.bind_address.clone()))?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        self.start_with_listener(listener)
    }

    /// Serve on an already bound listener.
    pub fn start_with_listener(&self, listener: TcpListener) -> Result<SocketAddr, ServerError> {
        let address = listener.local_addr()?;
        let mut running = self.lock_running();
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let shutdown = Shutdown::new();
        let router = self.router();
        let signal = shutdown.wait();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
        });

        *running = Some(Running {
            address,
            shutdown,
            task,
        });
        drop(running);

        tracing::info!(address = %address, "Bridge server listening");
        self.core.events.emit(ServerEvent::ServerOpen { address });
        Ok(address)
    }

    /// Disconnect every session, then stop accepting connections.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let Some(running) = self.lock_running().take() else {
            return Err(ServerError::NotRunning);
        };

        let sessions = self.core.registry.all();
        tracing::info!(sessions = sessions.len(), "Stopping bridge server");
        join_all(
            sessions
                .iter()
                .map(|session| session.disconnect(DisconnectReason::Disconnect)),
        )
        .await;

        running.shutdown.trigger();
        match running.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server exited with error"),
            Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
        }

        tracing::info!(address = %running.address, "Bridge server stopped");
        self.core.events.emit(ServerEvent::ServerClose);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|r| r.address)
    }

    /// Send a request to every connected session and collect the responses.
    ///
    /// `timeout` defaults to the configured request timeout.
    pub async fn broadcast(
        &self,
        channel: impl IntoChannelId,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<Vec<ClientResponse>, ChannelIdError> {
        let channel_id = channel.into_channel_id()?;
        let timeout = timeout.unwrap_or_else(|| self.core.settings.load().request_timeout());
        let sessions = self.core.registry.connected();

        let responses = join_all(
            sessions
                .iter()
                .map(|session| session.request(channel_id.clone(), data.clone(), timeout)),
        )
        .await;
        Ok(responses)
    }

    /// Register a handler for client → server requests.
    pub fn register_handler<H>(&self, channel: impl IntoChannelId, handler: H) -> Result<(), ChannelIdError>
    where
        H: Handler<Arc<Session>>,
    {
        self.core.dispatcher.register(channel, handler)
    }

    pub fn unregister_handler(&self, channel_id: &str) -> bool {
        self.core.dispatcher.unregister(channel_id)
    }

    pub fn events(&self) -> &EventBus<ServerEvent> {
        &self.core.events
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.core.registry
    }

    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.core.registry.get(id)
    }

    /// Allocate a session as `GET /new` does.
    pub fn create_session(&self) -> Arc<Session> {
        Session::create(&self.core)
    }

    /// Current session timing.
    pub fn settings(&self) -> Arc<SessionConfig> {
        self.core.settings.load_full()
    }

    /// Adopt reloaded session timing. It applies to the next `/new` and
    /// the next liveness check; the other sections are ignored.
    pub fn apply_config(&self, config: &BridgeConfig) {
        self.core.settings.store(Arc::new(config.session.clone()));
        tracing::info!(
            request_interval_ticks = config.session.request_interval_ticks,
            timeout_multiplier = config.session.timeout_multiplier,
            "Session settings reloaded"
        );
    }

    /// The HTTP routes, for embedding into another server.
    pub fn router(&self) -> axum::Router {
        crate::http::build_router(self.core.clone(), &self.listener)
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for BridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServer")
            .field("address", &self.local_addr())
            .field("sessions", &self.core.registry.len())
            .finish()
    }
}
