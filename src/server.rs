//! HTTP server lifecycle: bind, serve, graceful shutdown.

use crate::api::{self, AppState};
use crate::auth::ApiKey;
use crate::error::{DbError, DbResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// How long in-flight requests may run after a shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves the API until SIGINT or SIGTERM, then closes the pool.
pub struct HttpServer {
    state: AppState,
    api_key: ApiKey,
    bind_addr: String,
}

impl HttpServer {
    pub fn new(state: AppState, api_key: ApiKey, bind_addr: impl Into<String>) -> Self {
        Self {
            state,
            api_key,
            bind_addr: bind_addr.into(),
        }
    }

    pub async fn run(self) -> DbResult<()> {
        let app = api::router(self.state.clone(), self.api_key.clone());

        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            DbError::configuration(format!("Failed to bind to {}: {}", self.bind_addr, e))
        })?;
        info!(
            addr = %self.bind_addr,
            environment = %self.state.environment,
            "Server is listening"
        );

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();
        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        // Race the drain against the timeout and a second signal.
        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        self.state.db.close().await;
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for in-flight requests (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Closing database connections");
        self.state.db.close().await;
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
