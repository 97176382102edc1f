use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use murmur_gateway::session;

use crate::error::ApiError;
use crate::state::AppState;

/// The caller resolved by the session gate, available to protected handlers
/// as `Extension<AuthUser>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

/// Extract the bearer token from the Authorization header and resolve it
/// through the session gate before the handler runs.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_owned())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let user_id = session::authenticate(&state.db, &token).await?;

    req.extensions_mut().insert(AuthUser { user_id });
    Ok(next.run(req).await)
}
