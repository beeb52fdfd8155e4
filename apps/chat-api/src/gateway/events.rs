//! Gateway wire formats: the inbound message envelope and outbound events.

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::group::GroupSummary;

// ---------------------------------------------------------------------------
// Client → Server envelope
// ---------------------------------------------------------------------------

/// The loosely-typed frame as it arrives on the socket.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    group_id: Option<Value>,
}

/// A validated inbound message. Anything that fails validation never reaches
/// the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// No (or an unrecognised) `type`: broadcast to everyone.
    Public { content: String },
    Private { recipient: String, content: String },
    Group { group_id: i32, content: String },
}

/// Why a frame was rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Not a JSON object of the expected shape.
    Malformed,
    /// `type=private` without a non-empty `recipient`.
    MissingRecipient,
    /// `type=group` without a positive integer `group_id`.
    MissingGroupId,
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Malformed => "malformed frame",
            Self::MissingRecipient => "private message without recipient",
            Self::MissingGroupId => "group message without group_id",
        })
    }
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(|_| EnvelopeError::Malformed)?;
        Self::try_from(raw)
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Public { content } | Self::Private { content, .. } | Self::Group { content, .. } => {
                content
            }
        }
    }
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        let content = raw.content.unwrap_or_default();
        match raw.kind.as_deref() {
            Some("private") => {
                let recipient = raw
                    .recipient
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .ok_or(EnvelopeError::MissingRecipient)?;
                Ok(Self::Private { recipient, content })
            }
            Some("group") => {
                let group_id = raw
                    .group_id
                    .as_ref()
                    .and_then(Value::as_i64)
                    .filter(|id| *id > 0)
                    .and_then(|id| i32::try_from(id).ok())
                    .ok_or(EnvelopeError::MissingGroupId)?;
                Ok(Self::Group { group_id, content })
            }
            _ => Ok(Self::Public { content }),
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client events
// ---------------------------------------------------------------------------

/// Group lifecycle actions announced with `group_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupAction {
    AddedToGroup,
    OwnershipTransferred,
}

/// Every payload the server pushes over a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Public broadcast.
    Message {
        sender: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    PrivateMessage {
        sender: String,
        recipient: String,
        content: String,
        timestamp: DateTime<Utc>,
        #[serde(rename = "isPrivate")]
        is_private: bool,
    },
    GroupMessage {
        sender: String,
        group_id: i32,
        group_name: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// Presence snapshot.
    UsersUpdate { users: Vec<String> },
    GroupUpdate {
        action: GroupAction,
        group: GroupSummary,
    },
    /// Tells the client to refetch its group list.
    GroupsRefresh { action: &'static str },
}

impl ServerEvent {
    pub fn groups_refresh() -> Self {
        Self::GroupsRefresh {
            action: "refresh_groups",
        }
    }

    /// Serialize into a frame that can be cheaply cloned across recipients.
    pub fn to_frame(&self) -> Result<Utf8Bytes, serde_json::Error> {
        serde_json::to_string(self).map(Utf8Bytes::from)
    }
}
