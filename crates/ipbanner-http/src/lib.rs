//! ipbanner HTTP: REST transport adapter for the ban engine.
//!
//! Provides:
//! - the ban-guard middleware, for embedding the engine in any axum app
//! - the REST surface of the standalone ban service (queries, explicit bans,
//!   failure reports, health, stats, Prometheus metrics)

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

pub use middleware::ban_guard::AuthFailure;
pub use state::AppState;

/// Builds the ban service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/stats", get(routes::system::stats))
        .route("/metrics", get(routes::system::metrics_endpoint))
        .route(
            "/bans/{address}",
            get(routes::bans::ban_status).post(routes::bans::ban_address),
        )
        .route("/failures/{address}", post(routes::bans::report_failure))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wraps `app` with the ban guard backed by `state`'s engine.
///
/// Serve the result with `ConnectInfo<SocketAddr>` (see [`serve`]) so
/// clients not behind a proxy can be identified.
pub fn guard<S>(app: Router<S>, state: AppState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    app.layer(axum::middleware::from_fn_with_state(
        state,
        middleware::ban_guard::ban_guard_middleware,
    ))
}

/// Serve a router on the given listener with graceful shutdown.
///
/// Wraps `axum::serve` with `ConnectInfo<SocketAddr>` so the ban guard and
/// logging can extract client addresses.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
