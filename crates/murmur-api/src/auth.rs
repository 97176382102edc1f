use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_db::time;
use murmur_gateway::session::{generate_token, hash_token};
use murmur_gateway::store;
use murmur_types::api::{
    StartVerificationRequest, StartVerificationResponse, VerifyCodeRequest, VerifyCodeResponse,
};

use crate::error::ApiError;
use crate::state::AppState;

const CODE_LENGTH: usize = 6;
const DEFAULT_DISPLAY_NAME: &str = "New User";

/// POST /auth/start: issue a one-time code for a phone number and hand it
/// to the notifier. The code only appears in the response when the server
/// runs with code exposure enabled.
pub async fn start_verification(
    State(state): State<AppState>,
    body: Result<Json<StartVerificationRequest>, JsonRejection>,
) -> Result<Json<StartVerificationResponse>, ApiError> {
    let Json(req) = body?;
    let phone = normalize_phone(&req.phone)?;
    let code = generate_code();
    let now = time::now();
    let expires_at = now + state.settings.code_ttl;

    let (p, c) = (phone.clone(), code.clone());
    store::blocking(&state.db, move |db| db.create_verification(&p, &c, expires_at, now)).await?;

    state.notifier.send_code(&phone, &code)?;
    info!("Verification started for {}", phone);

    Ok(Json(StartVerificationResponse {
        phone,
        expires_at,
        code: state.settings.expose_codes.then_some(code),
    }))
}

/// POST /auth/verify: check the latest code for the phone, create the user
/// on first sign-in, and open a new session.
pub async fn verify_code(
    State(state): State<AppState>,
    body: Result<Json<VerifyCodeRequest>, JsonRejection>,
) -> Result<Json<VerifyCodeResponse>, ApiError> {
    let Json(req) = body?;
    let phone = normalize_phone(&req.phone)?;

    let p = phone.clone();
    let latest = store::blocking(&state.db, move |db| db.latest_verification(&p))
        .await?
        .ok_or_else(|| ApiError::not_found("no verification started"))?;

    let now = time::now();
    if latest.consumed_at.is_some() {
        return Err(ApiError::invalid("code already used"));
    }
    if latest.expires_at < now {
        return Err(ApiError::invalid("code expired"));
    }
    if latest.code != req.code.trim() {
        // Counted for the record only; there is no lockout.
        let id = latest.id;
        store::blocking(&state.db, move |db| db.record_verification_attempt(id)).await?;
        warn!("Wrong verification code for {} (attempt {})", phone, latest.attempts + 1);
        return Err(ApiError::invalid("invalid code"));
    }

    let id = latest.id;
    if !store::blocking(&state.db, move |db| db.consume_verification(id, now)).await? {
        return Err(ApiError::invalid("code already used"));
    }

    let token = generate_token();
    let token_hash = hash_token(&token);
    let session_ttl = state.settings.session_ttl;
    let name = req
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
    let photo_url = req.photo_url;

    let (user_id, created) = store::blocking(&state.db, move |db| {
        let (user_id, created) = match db.get_user_by_phone(&phone)? {
            Some(user) => (user.id, false),
            None => {
                let id = Uuid::new_v4();
                db.create_user(id, &phone, &name, photo_url.as_deref(), now)?;
                (id, true)
            }
        };
        db.create_session(Uuid::new_v4(), user_id, &token_hash, now + session_ttl, now)?;
        Ok((user_id, created))
    })
    .await?;

    if created {
        info!("Registered new user {}", user_id);
    }
    info!("Session opened for {}", user_id);

    Ok(Json(VerifyCodeResponse { token, user_id }))
}

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

/// Canonical `+<digits>` form of a phone number: 7–15 digits, with or
/// without the leading `+`. `None` when the input is not a phone number.
pub(crate) fn canonical_phone(raw: &str) -> Option<String> {
    let phone = raw.trim();
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if !(7..=15).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("+{}", digits))
}

fn normalize_phone(raw: &str) -> Result<String, ApiError> {
    canonical_phone(raw).ok_or_else(|| ApiError::invalid("invalid phone number"))
}
