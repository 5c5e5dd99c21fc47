//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Rooms
        .route(
            "/rooms",
            get(handlers::room::list_rooms).post(handlers::room::create_room),
        )
        .route(
            "/rooms/{id}",
            get(handlers::room::get_room).delete(handlers::room::delete_room),
        )
        .route("/rooms/{id}/snapshot", get(handlers::room::get_snapshot))
        .route("/rooms/{id}/archive", post(handlers::room::archive_room))
        .route("/rooms/{id}/summary", put(handlers::room::update_summary))
        .route(
            "/rooms/{id}/participants",
            get(handlers::room::list_participants).post(handlers::room::add_participant),
        )
        .route(
            "/rooms/{id}/participants/{bot_id}",
            axum::routing::delete(handlers::room::remove_participant),
        )
        .route("/rooms/{id}/cancel", post(handlers::bot::cancel_room))
        // Messages
        .route(
            "/rooms/{id}/messages",
            get(handlers::message::list_messages).post(handlers::message::send_message),
        )
        .route(
            "/rooms/{id}/messages/{message_id}",
            get(handlers::message::get_message).put(handlers::message::edit_message),
        )
        // Live room activity
        .route("/rooms/{id}/ws", get(handlers::ws::ws_handler))
        // Bots
        .route("/bots", get(handlers::bot::list_bots))
        .route("/bots/ws", get(handlers::ws::status_ws_handler))
        .route("/bots/{id}", get(handlers::bot::get_bot))
        .route("/bots/{id}/status", put(handlers::bot::set_status))
        // Role cards
        .route("/bots/{id}/card", get(handlers::role_card::get_card))
        .route("/bots/{id}/card/layers", get(handlers::role_card::get_layers))
        .route("/bots/{id}/card/proposals", post(handlers::role_card::propose))
        .route("/bots/{id}/card/{scope}", put(handlers::role_card::save_layer))
        .route("/proposals", get(handlers::role_card::list_proposals))
        .route("/proposals/{id}", get(handlers::role_card::get_proposal))
        .route("/proposals/{id}/approve", post(handlers::role_card::approve))
        .route("/proposals/{id}/reject", post(handlers::role_card::reject))
        // Escalations
        .route("/escalations", get(handlers::escalation::list_escalations))
        .route("/escalations/{id}", get(handlers::escalation::get_escalation))
        .route("/escalations/{id}/ack", post(handlers::escalation::acknowledge))
        .route("/escalations/{id}/resolve", post(handlers::escalation::resolve));

    Router::new()
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
