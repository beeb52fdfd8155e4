use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::{group_chats, group_membership};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = group_chats)]
pub struct GroupChat {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub max_members: i32,
    pub created_by: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = group_chats)]
pub struct NewGroupChat<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub is_private: bool,
    pub max_members: i32,
    pub created_by: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = group_membership)]
pub struct NewGroupMembership<'a> {
    pub group_id: i32,
    pub user_id: i32,
    pub role: &'a str,
    pub joined_at: DateTime<Utc>,
}

/// A member's role within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    /// Unknown stored roles degrade to `Member`.
    pub fn parse(role: &str) -> Self {
        match role {
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            _ => Self::Member,
        }
    }

    /// Owners and admins may add members.
    pub fn can_manage_members(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

/// One row of a group's member list.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupMember {
    #[serde(rename = "id")]
    pub user_id: i32,
    pub username: String,
    pub email: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// Read-only membership snapshot, fetched fresh for every group delivery.
#[derive(Debug, Clone)]
pub struct GroupMembershipView {
    pub group_id: i32,
    pub group_name: String,
    /// Ordered by join time.
    pub members: Vec<GroupMember>,
}

impl GroupMembershipView {
    pub fn member(&self, username: &str) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.username == username)
    }

    pub fn is_member(&self, username: &str) -> bool {
        self.member(username).is_some()
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.username.as_str())
    }
}

/// A group plus its current member count, as listed for a user.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupSummary {
    #[serde(flatten)]
    pub group: GroupChat,
    pub member_count: i64,
}

/// Result of creating a group: the group and the users actually added
/// besides the creator.
#[derive(Debug, Clone)]
pub struct CreatedGroup {
    pub group: GroupChat,
    pub added: Vec<crate::models::user::User>,
}

/// What happened when a member left a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Username promoted to owner, if the departing member was the owner.
    pub new_owner: Option<String>,
    /// The group had no members left and was removed.
    pub group_deleted: bool,
    /// Usernames still in the group.
    pub remaining: Vec<String>,
}
