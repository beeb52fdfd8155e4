//! Message history endpoints. Sending happens over the gateway only.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chat_common::channel::{ChannelKind, GENERAL};
use chat_common::ChannelKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::models::message::HistoryEntry;
use crate::AppState;

/// Default and maximum page sizes for history queries.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/messages", get(list_messages))
        .route("/api/messages/private/{username}", get(list_private_messages))
}

/// One message as returned by history endpoints, oldest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryMessage {
    pub id: i32,
    pub content: String,
    pub sender: String,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i32>,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "isPrivate")]
    pub is_private: bool,
}

impl HistoryMessage {
    pub fn from_entry(entry: HistoryEntry, recipient: Option<String>) -> Self {
        let is_private = ChannelKey::kind_of(&entry.channel) == ChannelKind::Private;
        Self {
            id: entry.id,
            content: entry.content,
            sender: entry.sender,
            channel: entry.channel,
            recipient,
            group_id: entry.group_id,
            timestamp: entry.timestamp,
            is_private,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub room: Option<String>,
    pub limit: Option<i64>,
}

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

#[utoipa::path(
    get,
    path = "/api/messages",
    tag = "Messages",
    security(("bearer" = [])),
    params(
        ("room" = Option<String>, Query, description = "Channel key (default general)"),
        ("limit" = Option<i64>, Query, description = "Number of messages (1-200, default 50)"),
    ),
    responses(
        (status = 200, description = "Channel history, oldest first", body = Vec<HistoryMessage>),
        (status = 400, description = "Private rooms use the private endpoint", body = crate::error::ApiErrorBody),
        (status = 403, description = "Not a member of the group", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn list_messages(
    AuthUser { username }: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryMessage>>, ApiError> {
    let room = query.room.unwrap_or_else(|| GENERAL.to_string());

    match ChannelKey::kind_of(&room) {
        ChannelKind::Private => {
            return Err(ApiError::bad_request(
                "Use /api/messages/private/{username} for private history",
            ));
        }
        ChannelKind::Group(group_id) => {
            state.groups.require_member(group_id, &username).await?;
        }
        ChannelKind::General | ChannelKind::Other => {}
    }

    let entries = state
        .store
        .list_channel_messages(&room, clamp_limit(query.limit))
        .await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| HistoryMessage::from_entry(e, None))
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/messages/private/{username}",
    tag = "Messages",
    security(("bearer" = [])),
    params(
        ("username" = String, Path, description = "The other participant"),
        ("limit" = Option<i64>, Query, description = "Number of messages (1-200, default 50)"),
    ),
    responses(
        (status = 200, description = "Conversation history, oldest first", body = Vec<HistoryMessage>),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn list_private_messages(
    AuthUser { username }: AuthUser,
    State(state): State<AppState>,
    Path(other): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryMessage>>, ApiError> {
    let channel = ChannelKey::private(&username, &other).to_string();
    let entries = state
        .store
        .list_conversation_messages(
            &channel,
            &[username.as_str(), other.as_str()],
            clamp_limit(query.limit),
        )
        .await?;

    let messages = entries
        .into_iter()
        .map(|entry| {
            let recipient = if entry.sender == username {
                other.clone()
            } else {
                username.clone()
            };
            HistoryMessage::from_entry(entry, Some(recipient))
        })
        .collect();
    Ok(Json(messages))
}
