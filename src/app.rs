use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::origin::{self, AllowedOrigins};
use crate::state::AppState;
use crate::{api, ws};

/// Assemble every route the relay serves
pub fn build_router(state: Arc<AppState>, origins: AllowedOrigins) -> Router {
    // WebSocket route with origin check
    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(
            Arc::new(origins.clone()),
            origin::ws_origin_middleware,
        ));

    Router::new()
        .merge(ws_routes)
        .route("/messages", get(api::history))
        .route("/api/health", get(api::health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(origin::cors_layer(&origins)),
        )
        .with_state(state)
}
