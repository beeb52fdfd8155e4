//! The persistence boundary used by the gateway and the REST routes.
//!
//! Every method is a single request to the backing store; no transaction is
//! held open across calls.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::group::{
    CreatedGroup, GroupChat, GroupMembershipView, GroupSummary, LeaveOutcome, MemberRole,
    NewGroupChat,
};
use crate::models::message::{HistoryEntry, Message, NewMessage};
use crate::models::push_subscription::{NewPushSubscription, PushSubscription};
use crate::models::user::User;

#[async_trait]
pub trait ChatStore: Send + Sync {
    // Users

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError>;

    async fn list_users(&self) -> Result<Vec<User>, ApiError>;

    // Messages

    /// Append a message; the store assigns `id` and `timestamp`.
    async fn insert_message(&self, message: NewMessage<'_>) -> Result<Message, ApiError>;

    /// The newest `limit` messages of a channel, returned oldest first.
    async fn list_channel_messages(
        &self,
        channel: &str,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, ApiError>;

    /// Like `list_channel_messages`, restricted to rows sent by one of
    /// `participants`. Distinct user pairs can share a private channel key
    /// when usernames contain `_`.
    async fn list_conversation_messages(
        &self,
        channel: &str,
        participants: &[&str],
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, ApiError>;

    // Groups

    async fn find_group(&self, group_id: i32) -> Result<Option<GroupChat>, ApiError>;

    /// Current members of a group, or `None` if the group does not exist.
    async fn resolve_group_members(
        &self,
        group_id: i32,
    ) -> Result<Option<GroupMembershipView>, ApiError>;

    async fn list_user_groups(&self, user_id: i32) -> Result<Vec<GroupSummary>, ApiError>;

    /// Create a group owned by `group.created_by` and add each existing user
    /// named in `members` (unknown names, duplicates and the creator are skipped).
    async fn create_group(
        &self,
        group: NewGroupChat<'_>,
        members: &[String],
    ) -> Result<CreatedGroup, ApiError>;

    async fn add_group_member(
        &self,
        group_id: i32,
        user_id: i32,
        role: MemberRole,
    ) -> Result<(), ApiError>;

    /// Remove a member. If the owner leaves, ownership passes to another
    /// admin, else to the longest-standing member; a group left empty is
    /// deleted. Returns `None` if the user was not a member.
    async fn leave_group(
        &self,
        group_id: i32,
        user_id: i32,
    ) -> Result<Option<LeaveOutcome>, ApiError>;

    // Push targets

    async fn list_push_targets(&self, user_id: i32) -> Result<Vec<PushSubscription>, ApiError>;

    /// Insert or re-own a subscription, keyed by endpoint.
    async fn upsert_push_target(
        &self,
        subscription: NewPushSubscription<'_>,
    ) -> Result<(), ApiError>;

    /// Delete a subscription regardless of owner. Returns whether one existed.
    async fn delete_push_target(&self, endpoint: &str) -> Result<bool, ApiError>;

    /// Delete a subscription only if `user_id` owns it.
    async fn delete_user_push_target(
        &self,
        user_id: i32,
        endpoint: &str,
    ) -> Result<bool, ApiError>;
}
