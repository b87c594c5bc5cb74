//! HTTP server wiring.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::service::{admitted, check, health, rate_limit};
use super::state::GateState;
use crate::error::{GatehouseError, Result};

/// Build the router with the rate-limit middleware applied to every route.
pub fn router(state: Arc<GateState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/check", post(check))
        .fallback(admitted)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server for the rate gate.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared gate state
    state: Arc<GateState>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, state: Arc<GateState>) -> Self {
        Self { addr, state }
    }

    /// Start the server and block until it stops.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            GatehouseError::Io(e)
        })?;

        info!(
            addr = %self.addr,
            policies = self.state.policy_count(),
            "Starting HTTP server"
        );

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GatehouseError::Io(e)
            })
    }
}
