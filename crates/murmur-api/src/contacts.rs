use std::collections::{HashMap, HashSet};

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::info;

use murmur_db::models::UserRow;
use murmur_db::time;
use murmur_gateway::store;
use murmur_types::api::{ContactResponse, SyncContactsRequest, SyncContactsResponse};

use crate::auth::canonical_phone;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

/// POST /contacts/sync: match address-book phones against registered users
/// and link the matches to the caller.
pub async fn sync_contacts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<SyncContactsRequest>, JsonRejection>,
) -> Result<Json<SyncContactsResponse>, ApiError> {
    let Json(req) = body?;
    let owner = user.user_id;
    let submitted = req.contacts.len();

    let matched = store::blocking(&state.db, move |db| {
        // Entries that are not phone numbers cannot match anyone.
        let entries: Vec<(Option<&str>, String)> = req
            .contacts
            .iter()
            .filter_map(|c| canonical_phone(&c.phone).map(|phone| (c.name.as_deref(), phone)))
            .collect();
        let phones: Vec<String> = entries.iter().map(|(_, phone)| phone.clone()).collect();
        let users = db.get_users_by_phones(&phones)?;
        let by_phone: HashMap<&str, &UserRow> = users.iter().map(|u| (u.phone.as_str(), u)).collect();

        let now = time::now();
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for (name, phone) in &entries {
            let Some(found) = by_phone.get(phone.as_str()) else {
                continue;
            };
            if found.id == owner || !seen.insert(found.id) {
                continue;
            }
            db.upsert_contact(owner, found.id, *name, phone, now)?;
            matched.push(contact_response(found));
        }
        Ok(matched)
    })
    .await?;

    info!("{} synced {} contacts, {} on murmur", owner, submitted, matched.len());

    Ok(Json(SyncContactsResponse { matched }))
}

/// GET /contacts: users the caller has linked via sync.
pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ContactResponse>>, ApiError> {
    let owner = user.user_id;
    let users = store::blocking(&state.db, move |db| db.list_contacts(owner)).await?;

    Ok(Json(users.iter().map(contact_response).collect()))
}

fn contact_response(user: &UserRow) -> ContactResponse {
    ContactResponse {
        user_id: user.id,
        name: user.name.clone(),
        phone: user.phone.clone(),
        photo_url: user.photo_url.clone(),
    }
}
