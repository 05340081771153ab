//! HTTP API: device snapshots, SSE streams and command write-back.

mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::hub::Hub;
use crate::mqtt::CommandPublisher;

/// Shared app state.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub config: Arc<Config>,
    pub commands: CommandPublisher,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/robots", get(routes::robots_list))
        .route("/api/robots/{manufacturer}/{serial}", get(routes::robots_get))
        .route(
            "/api/command/{manufacturer}/{serial}",
            post(routes::command_send),
        )
        // unprefixed paths kept for existing dashboard clients
        .route("/robots", get(routes::robots_list))
        .route("/command/{manufacturer}/{serial}", post(routes::command_send))
        .route("/stream", get(routes::stream_all))
        .route("/stream/{manufacturer}/{serial}", get(routes::stream_device))
        .layer(cors)
        .with_state(state)
}
