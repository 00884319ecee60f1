//! HTTP transport for file events.
//!
//! Serves the SSE event stream for one root together with read-only file
//! endpoints, a health check and Prometheus metrics.

pub mod handlers;
pub mod routes;
pub mod state;

pub use state::AppState;

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub struct WebServer {
    state: AppState,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with CORS applied
    pub fn router(&self) -> axum::Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any);

        routes::create_router(self.state.clone()).layer(cors)
    }

    /// Serve on `host:port` until `shutdown` resolves.
    pub async fn start(
        self,
        host: &str,
        port: u16,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

        let app = self.router();

        // open event streams only end once their connections are released
        let hub = self.state.hub.clone();
        let shutdown = async move {
            shutdown.await;
            info!("Shutting down, closing event streams");
            hub.shutdown();
        };

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        info!("Serving file events at http://{}/api/files/events", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .with_context(|| "Web server failed")?;

        Ok(())
    }
}
