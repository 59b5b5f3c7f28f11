//! API layer -- axum routes, handlers, and static frontend serving.

mod routes;
pub mod state;

use self::state::AppState;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.settings.server.frontend_dir);

    Router::new()
        .merge(routes::index_routes())
        .nest("/api", routes::api_routes())
        .nest_service("/static", static_files)
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
