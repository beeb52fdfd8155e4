//! Current user, user directory, and presence endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::{AuthUser, CurrentUser};
use crate::error::ApiError;
use crate::models::user::User;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/me", get(me))
        .route("/api/users", get(list_users))
        .route("/api/users/online", get(online_users))
}

/// A directory entry with live presence.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserEntry {
    pub id: i32,
    pub username: String,
    pub online: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineUsersResponse {
    pub users: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/api/me",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The authenticated user", body = User),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

#[utoipa::path(
    get,
    path = "/api/users",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "All users with presence", body = Vec<UserEntry>),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn list_users(
    _auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserEntry>>, ApiError> {
    let users = state.store.list_users().await?;
    let entries = users
        .into_iter()
        .map(|u| UserEntry {
            online: state.registry.is_online(&u.username),
            id: u.id,
            username: u.username,
        })
        .collect();
    Ok(Json(entries))
}

#[utoipa::path(
    get,
    path = "/api/users/online",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Connected usernames", body = OnlineUsersResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn online_users(_auth: AuthUser, State(state): State<AppState>) -> Json<OnlineUsersResponse> {
    Json(OnlineUsersResponse {
        users: state.registry.presence_snapshot(),
    })
}
