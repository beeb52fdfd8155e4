//! Group management endpoints.
//!
//! Membership changes are announced over the gateway: an added user gets a
//! `group_update`, everyone else affected gets `groups_refresh`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chat_common::ChannelKey;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::CurrentUser;
use crate::error::{ApiError, FieldError};
use crate::gateway::events::{GroupAction, ServerEvent};
use crate::models::group::{GroupChat, GroupMember, GroupSummary, MemberRole, NewGroupChat};
use crate::AppState;

use super::messages::{clamp_limit, HistoryMessage, HistoryQuery};

pub const MAX_GROUP_NAME_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const DEFAULT_MAX_MEMBERS: i32 = 50;
pub const MAX_MEMBERS_LIMIT: i32 = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/groups", get(list_groups).post(create_group))
        .route("/api/groups/{group_id}/members", get(list_members))
        .route("/api/groups/{group_id}/messages", get(list_group_messages))
        .route("/api/groups/{group_id}/members/{username}", post(add_member))
        .route("/api/groups/{group_id}/leave", delete(leave_group))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    pub max_members: Option<i32>,
    /// Usernames to add as members. Unknown names are skipped.
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

fn validate_create(body: &CreateGroupRequest) -> Result<i32, ApiError> {
    let mut errors = Vec::new();

    let name_len = body.name.trim().chars().count();
    if name_len == 0 || name_len > MAX_GROUP_NAME_CHARS {
        errors.push(FieldError {
            field: "name".to_string(),
            message: format!("Name must be between 1 and {MAX_GROUP_NAME_CHARS} characters"),
        });
    }

    if let Some(desc) = &body.description {
        if desc.chars().count() > MAX_DESCRIPTION_CHARS {
            errors.push(FieldError {
                field: "description".to_string(),
                message: format!("Description must be {MAX_DESCRIPTION_CHARS} characters or fewer"),
            });
        }
    }

    let max_members = body.max_members.unwrap_or(DEFAULT_MAX_MEMBERS);
    if !(2..=MAX_MEMBERS_LIMIT).contains(&max_members) {
        errors.push(FieldError {
            field: "max_members".to_string(),
            message: format!("max_members must be between 2 and {MAX_MEMBERS_LIMIT}"),
        });
    } else if body.members.len() + 1 > max_members as usize {
        errors.push(FieldError {
            field: "members".to_string(),
            message: "Too many members for max_members".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(max_members)
    } else {
        Err(ApiError::validation(errors))
    }
}

fn group_id_path(raw: &str) -> Result<i32, ApiError> {
    raw.parse::<i32>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::not_found("Group not found"))
}

// ---------------------------------------------------------------------------
// GET /api/groups
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/groups",
    tag = "Groups",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Groups the caller belongs to", body = Vec<GroupSummary>),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn list_groups(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<GroupSummary>>, ApiError> {
    let groups = state.store.list_user_groups(user.id).await?;
    Ok(Json(groups))
}

// ---------------------------------------------------------------------------
// POST /api/groups
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/groups",
    tag = "Groups",
    security(("bearer" = [])),
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created", body = GroupSummary),
        (status = 400, description = "Validation error", body = crate::error::ApiErrorBody),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn create_group(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupSummary>), ApiError> {
    let max_members = validate_create(&body)?;

    let created = state
        .store
        .create_group(
            NewGroupChat {
                name: body.name.trim(),
                description: body.description.as_deref(),
                is_private: body.is_private,
                max_members,
                created_by: user.id,
            },
            &body.members,
        )
        .await?;

    let summary = GroupSummary {
        member_count: created.added.len() as i64 + 1,
        group: created.group,
    };

    tracing::info!(
        group_id = summary.group.id,
        owner = %user.username,
        members = summary.member_count,
        "group created"
    );

    for member in &created.added {
        announce_added(&state, &member.username, &summary);
    }

    Ok((StatusCode::CREATED, Json(summary)))
}

fn announce_added(state: &AppState, username: &str, summary: &GroupSummary) {
    state.registry.send_event(
        username,
        &ServerEvent::GroupUpdate {
            action: GroupAction::AddedToGroup,
            group: summary.clone(),
        },
    );
    let body = summary
        .group
        .description
        .clone()
        .unwrap_or_else(|| "Tap to open the group".to_string());
    state.push.dispatch(
        username,
        format!("You were added to {}", summary.group.name),
        &body,
        serde_json::json!({
            "type": "group",
            "group_id": summary.group.id,
            "group_name": summary.group.name,
        }),
    );
}

fn refresh_groups<'a>(state: &AppState, usernames: impl IntoIterator<Item = &'a str>) {
    let event = ServerEvent::groups_refresh();
    for username in usernames {
        state.registry.send_event(username, &event);
    }
}

// ---------------------------------------------------------------------------
// GET /api/groups/{group_id}/members
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/groups/{group_id}/members",
    tag = "Groups",
    security(("bearer" = [])),
    params(
        ("group_id" = i32, Path, description = "Group ID"),
    ),
    responses(
        (status = 200, description = "Group members by join time", body = Vec<GroupMember>),
        (status = 403, description = "Not a member", body = crate::error::ApiErrorBody),
        (status = 404, description = "Group not found", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn list_members(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<Vec<GroupMember>>, ApiError> {
    let group_id = group_id_path(&group_id)?;
    let view = state.groups.require_member(group_id, &user.username).await?;
    Ok(Json(view.members))
}

// ---------------------------------------------------------------------------
// GET /api/groups/{group_id}/messages
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/groups/{group_id}/messages",
    tag = "Groups",
    security(("bearer" = [])),
    params(
        ("group_id" = i32, Path, description = "Group ID"),
        ("limit" = Option<i64>, Query, description = "Number of messages (1-200, default 50)"),
    ),
    responses(
        (status = 200, description = "Group history, oldest first", body = Vec<HistoryMessage>),
        (status = 403, description = "Not a member", body = crate::error::ApiErrorBody),
        (status = 404, description = "Group not found", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn list_group_messages(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryMessage>>, ApiError> {
    let group_id = group_id_path(&group_id)?;
    state.groups.require_member(group_id, &user.username).await?;

    let channel = ChannelKey::group(group_id).to_string();
    let entries = state
        .store
        .list_channel_messages(&channel, clamp_limit(query.limit))
        .await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| HistoryMessage::from_entry(e, None))
            .collect(),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/groups/{group_id}/members/{username}
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/groups/{group_id}/members/{username}",
    tag = "Groups",
    security(("bearer" = [])),
    params(
        ("group_id" = i32, Path, description = "Group ID"),
        ("username" = String, Path, description = "User to add"),
    ),
    responses(
        (status = 200, description = "Member added", body = MessageResponse),
        (status = 400, description = "Already a member or group full", body = crate::error::ApiErrorBody),
        (status = 403, description = "Caller is not an owner or admin", body = crate::error::ApiErrorBody),
        (status = 404, description = "User not found", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn add_member(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((group_id, username)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let group_id = group_id_path(&group_id)?;

    let view = state
        .groups
        .resolve_members(group_id)
        .await?
        .filter(|view| {
            view.member(&user.username)
                .is_some_and(|m| m.role.can_manage_members())
        })
        .ok_or_else(|| {
            ApiError::forbidden("You don't have permission to add members to this group")
        })?;

    let target = state
        .store
        .find_user_by_username(&username)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if view.is_member(&target.username) {
        return Err(ApiError::bad_request("User is already a member of this group"));
    }

    let group: GroupChat = state
        .store
        .find_group(group_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Group not found"))?;
    if view.members.len() >= group.max_members as usize {
        return Err(ApiError::bad_request("Group is full"));
    }

    state
        .store
        .add_group_member(group_id, target.id, MemberRole::Member)
        .await?;

    tracing::info!(group_id, added = %target.username, by = %user.username, "group member added");

    let summary = GroupSummary {
        member_count: view.members.len() as i64 + 1,
        group,
    };
    announce_added(&state, &target.username, &summary);
    refresh_groups(&state, view.usernames());

    Ok(Json(MessageResponse {
        message: format!("Successfully added {} to the group", target.username),
    }))
}

// ---------------------------------------------------------------------------
// DELETE /api/groups/{group_id}/leave
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/api/groups/{group_id}/leave",
    tag = "Groups",
    security(("bearer" = [])),
    params(
        ("group_id" = i32, Path, description = "Group ID"),
    ),
    responses(
        (status = 200, description = "Left the group", body = MessageResponse),
        (status = 404, description = "Not a member", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn leave_group(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let group_id = group_id_path(&group_id)?;

    let outcome = state
        .store
        .leave_group(group_id, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("You are not a member of this group"))?;

    tracing::info!(
        group_id,
        username = %user.username,
        new_owner = ?outcome.new_owner,
        deleted = outcome.group_deleted,
        "member left group"
    );

    if let Some(new_owner) = &outcome.new_owner {
        if let Some(group) = state.store.find_group(group_id).await? {
            state.registry.send_event(
                new_owner,
                &ServerEvent::GroupUpdate {
                    action: GroupAction::OwnershipTransferred,
                    group: GroupSummary {
                        member_count: outcome.remaining.len() as i64,
                        group,
                    },
                },
            );
        }
    }
    refresh_groups(&state, outcome.remaining.iter().map(String::as_str));

    Ok(Json(MessageResponse {
        message: "Successfully left the group".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, max_members: Option<i32>, members: usize) -> CreateGroupRequest {
        CreateGroupRequest {
            name: name.to_string(),
            description: None,
            is_private: false,
            max_members,
            members: (0..members).map(|i| format!("user{i}")).collect(),
        }
    }

    #[test]
    fn name_must_be_present_and_bounded() {
        assert!(validate_create(&request("  ", None, 0)).is_err());
        assert!(validate_create(&request(&"x".repeat(101), None, 0)).is_err());
        assert_eq!(validate_create(&request("team", None, 0)).unwrap(), 50);
    }

    #[test]
    fn members_must_fit_max_members() {
        assert!(validate_create(&request("team", Some(3), 2)).is_ok());
        let err = validate_create(&request("team", Some(3), 3)).unwrap_err();
        assert_eq!(err.details.unwrap()[0].field, "members");
        assert!(validate_create(&request("team", Some(1), 0)).is_err());
    }

    #[test]
    fn group_path_rejects_non_numeric() {
        assert_eq!(group_id_path("12").unwrap(), 12);
        assert!(group_id_path("abc").is_err());
        assert!(group_id_path("-1").is_err());
    }
}
