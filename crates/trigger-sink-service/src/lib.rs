//! # Trigger-Sink Service
//!
//! HTTP shell around the event sink: accepts webhook events on `POST /`,
//! answers liveness probes on `GET /live`, and owns server startup and
//! graceful shutdown.
//!
//! The binary is configured entirely through the environment (listener
//! identity, port, definitions file), matching the listener pod contract.

pub mod listeners;
pub mod resources;
pub mod sink;

pub use listeners::{Definitions, DefinitionsError, StaticTriggerStore};
pub use sink::{EventSink, SinkResponse};

use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// Environment contract
// ============================================================================

/// Environment variables configuring the listener pod.
const ENV_LISTENER_NAME: &str = "LISTENER_NAME";
const ENV_LISTENER_NAMESPACE: &str = "LISTENER_NAMESPACE";
const ENV_PORT: &str = "PORT";
const ENV_DEFINITIONS: &str = "LISTENER_DEFINITIONS";

/// Failures while reading the environment contract.
#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("required environment variable {name} is not set")]
    Missing { name: &'static str },

    #[error("environment variable {name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },
}

/// Startup arguments read from the environment.
#[derive(Debug, Clone)]
pub struct SinkArgs {
    pub listener_name: String,
    pub listener_namespace: String,
    pub port: u16,
    pub definitions_path: Option<PathBuf>,
}

impl SinkArgs {
    /// Read the required listener identity and port, plus the optional
    /// definitions-file path.
    pub fn from_env() -> Result<Self, ArgsError> {
        let listener_name = required(ENV_LISTENER_NAME)?;
        let listener_namespace = required(ENV_LISTENER_NAMESPACE)?;
        let port = required(ENV_PORT)?
            .parse()
            .map_err(|err| ArgsError::Invalid {
                name: ENV_PORT,
                message: format!("{}", err),
            })?;
        let definitions_path = std::env::var(ENV_DEFINITIONS)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            listener_name,
            listener_namespace,
            port,
            definitions_path,
        })
    }
}

fn required(name: &'static str) -> Result<String, ArgsError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ArgsError::Missing { name })
}

// ============================================================================
// Service errors
// ============================================================================

/// Top-level service failures, mapped to exit codes in `main`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to bind {addr}: {message}")]
    BindFailed { addr: SocketAddr, message: String },

    #[error("server failed: {message}")]
    ServerFailed { message: String },

    #[error(transparent)]
    Configuration(#[from] DefinitionsError),

    #[error(transparent)]
    Args(#[from] ArgsError),
}

// ============================================================================
// Router
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<EventSink>,
}

impl AppState {
    pub fn new(sink: Arc<EventSink>) -> Self {
        Self { sink }
    }
}

/// Build the sink router: event intake at the root and a liveness probe.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handle_event))
        .route("/live", get(handle_liveness))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Event intake: everything beyond reading the request is delegated to the
/// sink, which owns status-code semantics.
async fn handle_event(State(state): State<AppState>, request: Request) -> Response {
    state.sink.handle_event(request).await
}

/// Liveness probe.
async fn handle_liveness() -> &'static str {
    "ok"
}

// ============================================================================
// Server
// ============================================================================

/// Serve `state` on `addr` until a shutdown signal arrives.
///
/// In-flight requests are given a chance to finish after the signal; new
/// connections are refused immediately.
pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<(), ServiceError> {
    let app = create_router(state);

    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|err| ServiceError::BindFailed {
                addr,
                message: err.to_string(),
            })?;

    info!(%addr, "listening for events");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| ServiceError::ServerFailed {
            message: err.to_string(),
        })?;

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received interrupt, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
