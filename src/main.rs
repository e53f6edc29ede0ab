//! ipbanner server entry point.

use std::net::SocketAddr;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use ipbanner_server::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let state = match ipbanner_server::start(&config) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(%err, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        failure_status_codes = %state.policy(),
        "ipbanner server starting",
    );

    let addr = match config.host.parse() {
        Ok(ip) => SocketAddr::new(ip, config.port),
        Err(err) => {
            tracing::error!(%err, host = %config.host, "Invalid bind host");
            return ExitCode::FAILURE;
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, %addr, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(%addr, "ipbanner server ready");

    let app = ipbanner_server::router(state.clone());
    let served = ipbanner_http::serve(listener, app, shutdown_signal()).await;

    // Drain failure reports accepted before shutdown.
    state.stop().await;

    match served {
        Ok(()) => {
            tracing::info!("ipbanner server shut down");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(%err, "Server error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "Failed to install signal handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
