mod detect;
mod health;
mod home;
mod metrics;

pub use detect::DetectError;

use crate::server::SharedState;
use axum::{routing::get, Router};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(home::home))
        .route(
            "/detect",
            axum::routing::post(detect::detect_coins).options(detect::detect_options),
        )
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
