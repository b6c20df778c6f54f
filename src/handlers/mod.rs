pub mod health;
pub mod origin;
pub mod password_reset;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use health::health_check;
pub use password_reset::{request_password_reset, reset_password};

/// Router の構築
///
/// ConnectInfo を使うため `into_make_service_with_connect_info` で起動すること
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/password/reset-request", post(request_password_reset))
        .route("/api/password/reset", post(reset_password))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
