pub mod config;
pub mod error;
pub mod forward;
pub mod http;
pub mod memstore;
pub mod pending;
pub mod registry;
pub mod session;
pub mod state;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Assemble the broker's router: the control-channel WS upgrade at
/// `state.config.control_path`, the public forward endpoint, and the
/// ambient health/readiness routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(&state.config.control_path, get(http::tunnel_ws_handler))
        .route("/api/tunnels/{domain}/forward", post(http::forward_handler))
        .route("/healthz", get(http::healthz))
        .route("/readyz", get(http::readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
