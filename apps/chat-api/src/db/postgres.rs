//! PostgreSQL `ChatStore` on diesel-async.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use diesel_async::AsyncConnection;
use scoped_futures::ScopedFutureExt;

use crate::db::pool::DbPool;
use crate::db::schema::{group_chats, group_membership, messages, push_subscriptions, users};
use crate::db::store::ChatStore;
use crate::error::ApiError;
use crate::models::group::{
    CreatedGroup, GroupChat, GroupMember, GroupMembershipView, GroupSummary, LeaveOutcome,
    MemberRole, NewGroupChat, NewGroupMembership,
};
use crate::models::message::{HistoryEntry, Message, NewMessage};
use crate::models::push_subscription::{NewPushSubscription, PushSubscription};
use crate::models::user::User;

type MemberRow = (i32, String, String, String, chrono::DateTime<Utc>);

pub struct PgStore {
    db: DbPool,
}

impl PgStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        let mut conn = self.db.get().await?;
        let user = diesel_async::RunQueryDsl::get_result(
            users::table
                .filter(users::username.eq(username))
                .select(User::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        let mut conn = self.db.get().await?;
        let rows = diesel_async::RunQueryDsl::load(
            users::table.order(users::username.asc()).select(User::as_select()),
            &mut conn,
        )
        .await?;
        Ok(rows)
    }

    async fn insert_message(&self, message: NewMessage<'_>) -> Result<Message, ApiError> {
        let mut conn = self.db.get().await?;
        let stored = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(messages::table)
                .values(&message)
                .returning(Message::as_returning()),
            &mut conn,
        )
        .await?;
        Ok(stored)
    }

    async fn list_channel_messages(
        &self,
        channel: &str,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, ApiError> {
        let mut conn = self.db.get().await?;
        let mut rows: Vec<HistoryEntry> = diesel_async::RunQueryDsl::load(
            messages::table
                .inner_join(users::table)
                .filter(messages::channel.eq(channel))
                .order((messages::timestamp.desc(), messages::id.desc()))
                .limit(limit)
                .select((
                    messages::id,
                    messages::content,
                    users::username,
                    messages::channel,
                    messages::group_id,
                    messages::timestamp,
                )),
            &mut conn,
        )
        .await?;
        rows.reverse();
        Ok(rows)
    }

    async fn list_conversation_messages(
        &self,
        channel: &str,
        participants: &[&str],
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, ApiError> {
        let mut conn = self.db.get().await?;
        let mut rows: Vec<HistoryEntry> = diesel_async::RunQueryDsl::load(
            messages::table
                .inner_join(users::table)
                .filter(messages::channel.eq(channel))
                .filter(users::username.eq_any(participants))
                .order((messages::timestamp.desc(), messages::id.desc()))
                .limit(limit)
                .select((
                    messages::id,
                    messages::content,
                    users::username,
                    messages::channel,
                    messages::group_id,
                    messages::timestamp,
                )),
            &mut conn,
        )
        .await?;
        rows.reverse();
        Ok(rows)
    }

    async fn find_group(&self, group_id: i32) -> Result<Option<GroupChat>, ApiError> {
        let mut conn = self.db.get().await?;
        let group = diesel_async::RunQueryDsl::get_result(
            group_chats::table
                .find(group_id)
                .select(GroupChat::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(group)
    }

    async fn resolve_group_members(
        &self,
        group_id: i32,
    ) -> Result<Option<GroupMembershipView>, ApiError> {
        let mut conn = self.db.get().await?;

        // Left join so a group with no members still yields its row, and a
        // missing group yields nothing.
        let rows: Vec<(String, Option<MemberRow>)> = diesel_async::RunQueryDsl::load(
            group_chats::table
                .left_join(group_membership::table)
                .left_join(users::table.on(users::id.eq(group_membership::user_id)))
                .filter(group_chats::id.eq(group_id))
                .order((group_membership::joined_at.asc(), users::id.asc()))
                .select((
                    group_chats::name,
                    (
                        users::id,
                        users::username,
                        users::email,
                        group_membership::role,
                        group_membership::joined_at,
                    )
                        .nullable(),
                )),
            &mut conn,
        )
        .await?;

        let Some(group_name) = rows.first().map(|(name, _)| name.clone()) else {
            return Ok(None);
        };

        let members = rows
            .into_iter()
            .filter_map(|(_, member)| member)
            .map(|(user_id, username, email, role, joined_at)| GroupMember {
                user_id,
                username,
                email,
                role: MemberRole::parse(&role),
                joined_at,
            })
            .collect();

        Ok(Some(GroupMembershipView {
            group_id,
            group_name,
            members,
        }))
    }

    async fn list_user_groups(&self, user_id: i32) -> Result<Vec<GroupSummary>, ApiError> {
        let mut conn = self.db.get().await?;

        let groups: Vec<GroupChat> = diesel_async::RunQueryDsl::load(
            group_chats::table
                .inner_join(group_membership::table)
                .filter(group_membership::user_id.eq(user_id))
                .order(group_chats::id.asc())
                .select(GroupChat::as_select()),
            &mut conn,
        )
        .await?;

        let ids: Vec<i32> = groups.iter().map(|g| g.id).collect();
        let counts: Vec<(i32, i64)> = diesel_async::RunQueryDsl::load(
            group_membership::table
                .filter(group_membership::group_id.eq_any(&ids))
                .group_by(group_membership::group_id)
                .select((group_membership::group_id, diesel::dsl::count_star())),
            &mut conn,
        )
        .await?;

        Ok(groups
            .into_iter()
            .map(|group| {
                let member_count = counts
                    .iter()
                    .find(|(id, _)| *id == group.id)
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                GroupSummary {
                    group,
                    member_count,
                }
            })
            .collect())
    }

    async fn create_group(
        &self,
        group: NewGroupChat<'_>,
        members: &[String],
    ) -> Result<CreatedGroup, ApiError> {
        let mut conn = self.db.get().await?;

        conn.transaction::<_, ApiError, _>(|conn| {
            async move {
                let chat: GroupChat = diesel_async::RunQueryDsl::get_result(
                    diesel::insert_into(group_chats::table)
                        .values(&group)
                        .returning(GroupChat::as_returning()),
                    conn,
                )
                .await?;

                let now = Utc::now();
                diesel_async::RunQueryDsl::execute(
                    diesel::insert_into(group_membership::table).values(NewGroupMembership {
                        group_id: chat.id,
                        user_id: chat.created_by,
                        role: MemberRole::Owner.as_str(),
                        joined_at: now,
                    }),
                    conn,
                )
                .await?;

                let candidates: Vec<User> = diesel_async::RunQueryDsl::load(
                    users::table
                        .filter(users::username.eq_any(members))
                        .filter(users::id.ne(chat.created_by))
                        .order(users::id.asc())
                        .select(User::as_select()),
                    conn,
                )
                .await?;

                // Preserve the caller's ordering for join times.
                let mut added: Vec<User> = Vec::with_capacity(candidates.len());
                for name in members {
                    if added.iter().any(|u| &u.username == name) {
                        continue;
                    }
                    if let Some(user) = candidates.iter().find(|u| &u.username == name) {
                        added.push(user.clone());
                    }
                }

                let rows: Vec<NewGroupMembership> = added
                    .iter()
                    .map(|u| NewGroupMembership {
                        group_id: chat.id,
                        user_id: u.id,
                        role: MemberRole::Member.as_str(),
                        joined_at: now,
                    })
                    .collect();
                if !rows.is_empty() {
                    diesel_async::RunQueryDsl::execute(
                        diesel::insert_into(group_membership::table).values(&rows),
                        conn,
                    )
                    .await?;
                }

                Ok(CreatedGroup { group: chat, added })
            }
            .scope_boxed()
        })
        .await
    }

    async fn add_group_member(
        &self,
        group_id: i32,
        user_id: i32,
        role: MemberRole,
    ) -> Result<(), ApiError> {
        let mut conn = self.db.get().await?;
        let inserted = diesel_async::RunQueryDsl::execute(
            diesel::insert_into(group_membership::table)
                .values(NewGroupMembership {
                    group_id,
                    user_id,
                    role: role.as_str(),
                    joined_at: Utc::now(),
                })
                .on_conflict_do_nothing(),
            &mut conn,
        )
        .await?;
        if inserted == 0 {
            return Err(ApiError::bad_request("User is already a member of this group"));
        }
        Ok(())
    }

    async fn leave_group(
        &self,
        group_id: i32,
        user_id: i32,
    ) -> Result<Option<LeaveOutcome>, ApiError> {
        let mut conn = self.db.get().await?;

        conn.transaction::<_, ApiError, _>(|conn| {
            async move {
                let role: Option<String> = diesel_async::RunQueryDsl::get_result(
                    diesel::delete(group_membership::table.find((group_id, user_id)))
                        .returning(group_membership::role),
                    conn,
                )
                .await
                .optional()?;
                let Some(role) = role else {
                    return Ok(None);
                };

                let others: Vec<(i32, String, String)> = diesel_async::RunQueryDsl::load(
                    group_membership::table
                        .inner_join(users::table)
                        .filter(group_membership::group_id.eq(group_id))
                        .order((group_membership::joined_at.asc(), users::id.asc()))
                        .select((users::id, users::username, group_membership::role)),
                    conn,
                )
                .await?;

                let mut outcome = LeaveOutcome::default();

                if others.is_empty() {
                    diesel_async::RunQueryDsl::execute(
                        diesel::delete(group_chats::table.find(group_id)),
                        conn,
                    )
                    .await?;
                    outcome.group_deleted = true;
                    return Ok(Some(outcome));
                }

                if MemberRole::parse(&role) == MemberRole::Owner {
                    let successor = others
                        .iter()
                        .find(|(_, _, r)| MemberRole::parse(r).can_manage_members())
                        .unwrap_or(&others[0]);

                    diesel_async::RunQueryDsl::execute(
                        diesel::update(group_membership::table.find((group_id, successor.0)))
                            .set(group_membership::role.eq(MemberRole::Owner.as_str())),
                        conn,
                    )
                    .await?;
                    diesel_async::RunQueryDsl::execute(
                        diesel::update(group_chats::table.find(group_id))
                            .set(group_chats::created_by.eq(successor.0)),
                        conn,
                    )
                    .await?;
                    outcome.new_owner = Some(successor.1.clone());
                }

                outcome.remaining = others.into_iter().map(|(_, name, _)| name).collect();
                Ok(Some(outcome))
            }
            .scope_boxed()
        })
        .await
    }

    async fn list_push_targets(&self, user_id: i32) -> Result<Vec<PushSubscription>, ApiError> {
        let mut conn = self.db.get().await?;
        let rows = diesel_async::RunQueryDsl::load(
            push_subscriptions::table
                .filter(push_subscriptions::user_id.eq(user_id))
                .order(push_subscriptions::id.asc())
                .select(PushSubscription::as_select()),
            &mut conn,
        )
        .await?;
        Ok(rows)
    }

    async fn upsert_push_target(
        &self,
        subscription: NewPushSubscription<'_>,
    ) -> Result<(), ApiError> {
        let mut conn = self.db.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(push_subscriptions::table)
                .values(&subscription)
                .on_conflict(push_subscriptions::endpoint)
                .do_update()
                .set(&subscription),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn delete_push_target(&self, endpoint: &str) -> Result<bool, ApiError> {
        let mut conn = self.db.get().await?;
        let deleted = diesel_async::RunQueryDsl::execute(
            diesel::delete(
                push_subscriptions::table.filter(push_subscriptions::endpoint.eq(endpoint)),
            ),
            &mut conn,
        )
        .await?;
        Ok(deleted > 0)
    }

    async fn delete_user_push_target(
        &self,
        user_id: i32,
        endpoint: &str,
    ) -> Result<bool, ApiError> {
        let mut conn = self.db.get().await?;
        let deleted = diesel_async::RunQueryDsl::execute(
            diesel::delete(
                push_subscriptions::table
                    .filter(push_subscriptions::endpoint.eq(endpoint))
                    .filter(push_subscriptions::user_id.eq(user_id)),
            ),
            &mut conn,
        )
        .await?;
        Ok(deleted > 0)
    }
}
