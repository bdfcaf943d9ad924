mod cli;
mod config;
mod error;
mod handlers;
mod ssh;
mod transport;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::ServerConfig;
use crate::handlers::{health, shell_handler, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match ServerConfig::from_cli(cli) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            std::process::exit(2);
        }
    };

    let state = AppState {
        ssh: config.ssh.clone(),
    };
    let app = Router::new()
        .route("/health", get(health))
        .route("/ssh/:host", get(shell_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, error = %err, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(%addr, "gangway-pier listening");
    if let Err(err) = axum::serve(listener, app).await {
        error!(error = %err, "server error");
        std::process::exit(1);
    }
}
