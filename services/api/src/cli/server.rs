//! services/api/src/cli/server.rs
//!
//! The `server` command: wires the adapters into the HTTP API and serves it
//! until Ctrl-C or SIGTERM.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapters::{ChromiumLauncher, LopdfAssembler};
use crate::config::Config;
use crate::error::ApiError;
use crate::web::{build_router, close_all_sessions, spawn_session_sweeper, AppState};

#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    /// Port to listen on [default: 8080, or BIND_ADDRESS]
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Address to bind [default: 0.0.0.0, or BIND_ADDRESS]
    #[arg(short = 'H', long)]
    pub host: Option<IpAddr>,
}

impl ServerArgs {
    /// `configured` with the flags that were given applied on top.
    pub fn bind_address(&self, configured: SocketAddr) -> SocketAddr {
        SocketAddr::new(
            self.host.unwrap_or(configured.ip()),
            self.port.unwrap_or(configured.port()),
        )
    }
}

pub async fn run_server(args: ServerArgs, mut config: Config) -> Result<(), ApiError> {
    config.bind_address = args.bind_address(config.bind_address);
    let config = Arc::new(config);

    // --- 1. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(
        config.clone(),
        config.edubase(),
        Arc::new(ChromiumLauncher::new()),
        Arc::new(LopdfAssembler::new()),
    ));

    // --- 2. Background Tasks ---
    let shutdown = CancellationToken::new();
    let sweeper = spawn_session_sweeper(app_state.clone(), shutdown.clone());

    // --- 3. Start the Server ---
    let app = build_router(app_state.clone());
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // --- 4. Release every browser ---
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        error!("Session sweeper ended abnormally: {}", e);
    }
    close_all_sessions(&app_state).await;
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM and cancels `token`.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => {},
    }
    info!("Shutdown signal received");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_configured_address() {
        let configured: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        let none = ServerArgs { port: None, host: None };
        assert_eq!(none.bind_address(configured), configured);

        let both = ServerArgs {
            port: Some(9000),
            host: Some("127.0.0.1".parse().unwrap()),
        };
        assert_eq!(both.bind_address(configured).to_string(), "127.0.0.1:9000");
    }

    #[tokio::test]
    async fn cancelling_the_token_triggers_shutdown() {
        let token = CancellationToken::new();
        token.cancel();
        shutdown_signal(token.clone()).await;
        assert!(token.is_cancelled());
    }
}
