//! Axum router configuration with middleware.
//!
//! The generation proxy lives at `/api/chat`; the session persistence API
//! is under `/api/v1/`. Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, patch, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/sessions",
            get(handlers::session::list_sessions).post(handlers::session::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::session::get_session)
                .patch(handlers::session::rename_session)
                .delete(handlers::session::delete_session),
        )
        .route("/sessions/{id}/messages", post(handlers::session::append_message))
        .route(
            "/sessions/{id}/messages/{message_id}",
            patch(handlers::session::edit_message),
        )
        .route(
            "/sessions/{id}/messages/{message_id}/content",
            put(handlers::session::update_message_content),
        );

    Router::new()
        .route("/api/chat", post(handlers::chat::proxy_chat))
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use crate::http::testing::spawn_server;

    #[tokio::test]
    async fn test_health() {
        let server = spawn_server(None).await;
        let body: serde_json::Value = server
            .client
            .get(server.url("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }
}
