//! Web application router and middleware setup.

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::web::handlers;
use crate::web::state::AppState;
use crate::web::websocket;

/// Create the main axum application with all routes and middleware.
pub fn create_app(state: AppState) -> Router {
    let enable_cors = state.config.enable_cors;

    let mut app = Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/servers/:server_id/stats", get(handlers::get_stats))
        .route(
            "/api/servers/:server_id/errors",
            get(handlers::list_errors).delete(handlers::clear_errors),
        )
        .route(
            "/api/servers/:server_id/errors/:fingerprint",
            get(handlers::get_error),
        )
        .route(
            "/api/servers/:server_id/errors/:fingerprint/resolve",
            post(handlers::resolve_error),
        )
        .route(
            "/api/servers/:server_id/errors/:fingerprint/unresolve",
            post(handlers::unresolve_error),
        )
        .route(
            "/api/servers/:server_id/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .route(
            "/api/servers/:server_id/capabilities",
            get(handlers::get_capabilities),
        )
        .route(
            "/api/servers/:server_id/collector",
            get(handlers::get_collector_stats),
        )
        .route("/api/servers/:server_id/ingest", post(handlers::ingest_lines))
        .route("/api/notifications", get(handlers::list_notifications))
        .route(
            "/api/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
        .route("/ws", get(websocket::websocket_handler))
        .with_state(state);

    if enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
