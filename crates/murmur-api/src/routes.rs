use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tracing::warn;

use murmur_gateway::connection;
use murmur_gateway::store;
use murmur_types::api::HealthResponse;

use crate::middleware::require_session;
use crate::state::AppState;
use crate::{auth, contacts, messages};

/// Every HTTP and WebSocket route. Transport layers (CORS, tracing) are
/// added by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth/start", post(auth::start_verification))
        .route("/auth/verify", post(auth::verify_code))
        .route("/ws", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/messages/send", post(messages::send_message))
        .route("/messages/history", get(messages::get_history))
        .route("/messages/read", post(messages::mark_read))
        .route("/contacts/sync", post(contacts::sync_contacts))
        .route("/contacts", get(contacts::list_contacts))
        .layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "murmur messaging backend running" }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match store::blocking(&state.db, |db| db.ping()).await {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            warn!("Health check: store unavailable: {}", e);
            "unavailable".to_string()
        }
    };

    Json(HealthResponse {
        status: if database == "ok" { "ok" } else { "degraded" }.to_string(),
        database,
        online_users: state.presence.online_count(),
    })
}

/// GET /ws: the token is checked on the first frame, not at upgrade time.
async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let presence = state.presence.clone();
    let db = state.db.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, presence, db))
}
