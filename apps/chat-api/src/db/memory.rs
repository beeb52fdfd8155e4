//! In-memory `ChatStore` for tests and database-less local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::db::store::ChatStore;
use crate::error::ApiError;
use crate::models::group::{
    CreatedGroup, GroupChat, GroupMember, GroupMembershipView, GroupSummary, LeaveOutcome,
    MemberRole, NewGroupChat,
};
use crate::models::message::{HistoryEntry, Message, NewMessage};
use crate::models::push_subscription::{NewPushSubscription, PushSubscription};
use crate::models::user::User;

struct Membership {
    group_id: i32,
    user_id: i32,
    role: MemberRole,
    joined_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    next_id: i32,
    last_timestamp: Option<DateTime<Utc>>,
    users: Vec<User>,
    messages: Vec<Message>,
    groups: BTreeMap<i32, GroupChat>,
    /// Insertion order is join order.
    memberships: Vec<Membership>,
    push: Vec<PushSubscription>,
}

impl Inner {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    /// Wall-clock time clamped so timestamps never go backwards.
    fn now(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn user(&self, user_id: i32) -> Option<&User> {
        self.users.iter().find(|u| u.id == user_id)
    }

    fn view(&self, group_id: i32) -> Option<GroupMembershipView> {
        let group = self.groups.get(&group_id)?;
        let members = self
            .memberships
            .iter()
            .filter(|m| m.group_id == group_id)
            .filter_map(|m| {
                self.user(m.user_id).map(|u| GroupMember {
                    user_id: u.id,
                    username: u.username.clone(),
                    email: u.email.clone(),
                    role: m.role,
                    joined_at: m.joined_at,
                })
            })
            .collect();
        Some(GroupMembershipView {
            group_id,
            group_name: group.name.clone(),
            members,
        })
    }
}

/// Single-lock in-memory store. Ids are sequential across all tables.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Register a user, as the auth service would.
    pub fn add_user(&self, username: &str, email: &str) -> User {
        let mut inner = self.inner.lock();
        let user = User {
            id: inner.next_id(),
            username: username.to_string(),
            email: email.to_string(),
            is_active: true,
            created_at: inner.now(),
        };
        inner.users.push(user.clone());
        user
    }

    /// Make every subsequent call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All stored messages, in insertion order.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().messages.clone()
    }

    fn check(&self) -> Result<(), ApiError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ApiError::store_unavailable("Database unavailable"))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner.users.iter().find(|u| u.username == username).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.check()?;
        Ok(self.inner.lock().users.clone())
    }

    async fn insert_message(&self, message: NewMessage<'_>) -> Result<Message, ApiError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let stored = Message {
            id: inner.next_id(),
            content: message.content.to_string(),
            sender_id: message.sender_id,
            channel: message.channel.to_string(),
            group_id: message.group_id,
            timestamp: inner.now(),
        };
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn list_channel_messages(
        &self,
        channel: &str,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, ApiError> {
        self.check()?;
        let inner = self.inner.lock();
        let mut entries: Vec<HistoryEntry> = inner
            .messages
            .iter()
            .rev()
            .filter(|m| m.channel == channel)
            .take(limit.max(0) as usize)
            .map(|m| HistoryEntry {
                id: m.id,
                content: m.content.clone(),
                sender: inner
                    .user(m.sender_id)
                    .map(|u| u.username.clone())
                    .unwrap_or_default(),
                channel: m.channel.clone(),
                group_id: m.group_id,
                timestamp: m.timestamp,
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn list_conversation_messages(
        &self,
        channel: &str,
        participants: &[&str],
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, ApiError> {
        self.check()?;
        let inner = self.inner.lock();
        let mut entries: Vec<HistoryEntry> = inner
            .messages
            .iter()
            .rev()
            .filter(|m| m.channel == channel)
            .filter_map(|m| {
                let sender = inner.user(m.sender_id)?;
                participants
                    .contains(&sender.username.as_str())
                    .then(|| HistoryEntry {
                        id: m.id,
                        content: m.content.clone(),
                        sender: sender.username.clone(),
                        channel: m.channel.clone(),
                        group_id: m.group_id,
                        timestamp: m.timestamp,
                    })
            })
            .take(limit.max(0) as usize)
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn find_group(&self, group_id: i32) -> Result<Option<GroupChat>, ApiError> {
        self.check()?;
        Ok(self.inner.lock().groups.get(&group_id).cloned())
    }

    async fn resolve_group_members(
        &self,
        group_id: i32,
    ) -> Result<Option<GroupMembershipView>, ApiError> {
        self.check()?;
        Ok(self.inner.lock().view(group_id))
    }

    async fn list_user_groups(&self, user_id: i32) -> Result<Vec<GroupSummary>, ApiError> {
        self.check()?;
        let inner = self.inner.lock();
        let summaries = inner
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| inner.groups.get(&m.group_id))
            .map(|group| GroupSummary {
                group: group.clone(),
                member_count: inner
                    .memberships
                    .iter()
                    .filter(|m| m.group_id == group.id)
                    .count() as i64,
            })
            .collect();
        Ok(summaries)
    }

    async fn create_group(
        &self,
        group: NewGroupChat<'_>,
        members: &[String],
    ) -> Result<CreatedGroup, ApiError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        let created_at = inner.now();
        let chat = GroupChat {
            id,
            name: group.name.to_string(),
            description: group.description.map(str::to_string),
            is_private: group.is_private,
            max_members: group.max_members,
            created_by: group.created_by,
            created_at,
        };
        inner.groups.insert(id, chat.clone());
        inner.memberships.push(Membership {
            group_id: id,
            user_id: group.created_by,
            role: MemberRole::Owner,
            joined_at: created_at,
        });

        let mut added: Vec<User> = Vec::new();
        for name in members {
            let Some(user) = inner.users.iter().find(|u| &u.username == name).cloned() else {
                continue;
            };
            if user.id == group.created_by || added.iter().any(|a| a.id == user.id) {
                continue;
            }
            let joined_at = inner.now();
            inner.memberships.push(Membership {
                group_id: id,
                user_id: user.id,
                role: MemberRole::Member,
                joined_at,
            });
            added.push(user);
        }

        Ok(CreatedGroup { group: chat, added })
    }

    async fn add_group_member(
        &self,
        group_id: i32,
        user_id: i32,
        role: MemberRole,
    ) -> Result<(), ApiError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if !inner.groups.contains_key(&group_id) {
            return Err(ApiError::not_found("Group not found"));
        }
        if inner
            .memberships
            .iter()
            .any(|m| m.group_id == group_id && m.user_id == user_id)
        {
            return Err(ApiError::bad_request("User is already a member of this group"));
        }
        let joined_at = inner.now();
        inner.memberships.push(Membership {
            group_id,
            user_id,
            role,
            joined_at,
        });
        Ok(())
    }

    async fn leave_group(
        &self,
        group_id: i32,
        user_id: i32,
    ) -> Result<Option<LeaveOutcome>, ApiError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let Some(pos) = inner
            .memberships
            .iter()
            .position(|m| m.group_id == group_id && m.user_id == user_id)
        else {
            return Ok(None);
        };
        let leaving = inner.memberships.remove(pos);

        let mut outcome = LeaveOutcome::default();
        let others: Vec<usize> = inner
            .memberships
            .iter()
            .enumerate()
            .filter(|(_, m)| m.group_id == group_id)
            .map(|(i, _)| i)
            .collect();

        if others.is_empty() {
            inner.groups.remove(&group_id);
            outcome.group_deleted = true;
            return Ok(Some(outcome));
        }

        if leaving.role == MemberRole::Owner {
            let successor = others
                .iter()
                .copied()
                .find(|&i| inner.memberships[i].role.can_manage_members())
                .unwrap_or(others[0]);
            inner.memberships[successor].role = MemberRole::Owner;
            let successor_id = inner.memberships[successor].user_id;
            if let Some(group) = inner.groups.get_mut(&group_id) {
                group.created_by = successor_id;
            }
            outcome.new_owner = inner.user(successor_id).map(|u| u.username.clone());
        }

        outcome.remaining = others
            .iter()
            .filter_map(|&i| inner.user(inner.memberships[i].user_id))
            .map(|u| u.username.clone())
            .collect();
        Ok(Some(outcome))
    }

    async fn list_push_targets(&self, user_id: i32) -> Result<Vec<PushSubscription>, ApiError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner
            .push
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn upsert_push_target(
        &self,
        subscription: NewPushSubscription<'_>,
    ) -> Result<(), ApiError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .push
            .iter_mut()
            .find(|s| s.endpoint == subscription.endpoint)
        {
            existing.user_id = subscription.user_id;
            existing.p256dh = subscription.p256dh.to_string();
            existing.auth = subscription.auth.to_string();
            return Ok(());
        }
        let id = inner.next_id();
        let created_at = inner.now();
        inner.push.push(PushSubscription {
            id,
            user_id: subscription.user_id,
            endpoint: subscription.endpoint.to_string(),
            p256dh: subscription.p256dh.to_string(),
            auth: subscription.auth.to_string(),
            created_at,
        });
        Ok(())
    }

    async fn delete_push_target(&self, endpoint: &str) -> Result<bool, ApiError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let before = inner.push.len();
        inner.push.retain(|s| s.endpoint != endpoint);
        Ok(inner.push.len() != before)
    }

    async fn delete_user_push_target(
        &self,
        user_id: i32,
        endpoint: &str,
    ) -> Result<bool, ApiError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let before = inner.push.len();
        inner
            .push
            .retain(|s| !(s.endpoint == endpoint && s.user_id == user_id));
        Ok(inner.push.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_group<'a>(name: &'a str, owner: &User) -> NewGroupChat<'a> {
        NewGroupChat {
            name,
            description: None,
            is_private: false,
            max_members: 10,
            created_by: owner.id,
        }
    }

    #[tokio::test]
    async fn timestamps_never_decrease() {
        let store = MemoryStore::new();
        let alice = store.add_user("alice", "alice@example.com");
        let mut last = None;
        for i in 0..50 {
            let content = format!("m{i}");
            let msg = store
                .insert_message(NewMessage {
                    content: &content,
                    sender_id: alice.id,
                    channel: "general",
                    group_id: None,
                })
                .await
                .unwrap();
            if let Some(prev) = last {
                assert!(msg.timestamp >= prev);
            }
            last = Some(msg.timestamp);
        }
    }

    #[tokio::test]
    async fn history_is_newest_window_oldest_first() {
        let store = MemoryStore::new();
        let alice = store.add_user("alice", "alice@example.com");
        for content in ["one", "two", "three"] {
            store
                .insert_message(NewMessage {
                    content,
                    sender_id: alice.id,
                    channel: "general",
                    group_id: None,
                })
                .await
                .unwrap();
        }
        let history = store.list_channel_messages("general", 2).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, ["two", "three"]);
        assert_eq!(history[0].sender, "alice");
    }

    #[tokio::test]
    async fn create_group_skips_unknown_duplicate_and_creator() {
        let store = MemoryStore::new();
        let alice = store.add_user("alice", "a@example.com");
        store.add_user("bob", "b@example.com");

        let created = store
            .create_group(
                new_group("team", &alice),
                &["bob".into(), "bob".into(), "ghost".into(), "alice".into()],
            )
            .await
            .unwrap();
        assert_eq!(created.added.len(), 1);

        let view = store
            .resolve_group_members(created.group.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.usernames().collect::<Vec<_>>(), ["alice", "bob"]);
        assert_eq!(view.member("alice").unwrap().role, MemberRole::Owner);
    }

    #[tokio::test]
    async fn owner_leaving_promotes_admin_before_older_member() {
        let store = MemoryStore::new();
        let alice = store.add_user("alice", "a@example.com");
        let bob = store.add_user("bob", "b@example.com");
        let carol = store.add_user("carol", "c@example.com");
        let group = store
            .create_group(new_group("team", &alice), &[])
            .await
            .unwrap()
            .group;
        store
            .add_group_member(group.id, bob.id, MemberRole::Member)
            .await
            .unwrap();
        store
            .add_group_member(group.id, carol.id, MemberRole::Admin)
            .await
            .unwrap();

        let outcome = store.leave_group(group.id, alice.id).await.unwrap().unwrap();
        assert_eq!(outcome.new_owner.as_deref(), Some("carol"));
        assert!(!outcome.group_deleted);
        assert_eq!(outcome.remaining, ["bob", "carol"]);
        assert_eq!(
            store.find_group(group.id).await.unwrap().unwrap().created_by,
            carol.id
        );
    }

    #[tokio::test]
    async fn last_member_leaving_deletes_group() {
        let store = MemoryStore::new();
        let alice = store.add_user("alice", "a@example.com");
        let group = store
            .create_group(new_group("solo", &alice), &[])
            .await
            .unwrap()
            .group;

        let outcome = store.leave_group(group.id, alice.id).await.unwrap().unwrap();
        assert!(outcome.group_deleted);
        assert!(store.resolve_group_members(group.id).await.unwrap().is_none());
        assert!(store.leave_group(group.id, alice.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_reassigns_endpoint_owner() {
        let store = MemoryStore::new();
        let alice = store.add_user("alice", "a@example.com");
        let bob = store.add_user("bob", "b@example.com");
        let sub = |user_id| NewPushSubscription {
            user_id,
            endpoint: "https://push.example/1",
            p256dh: "key",
            auth: "auth",
        };
        store.upsert_push_target(sub(alice.id)).await.unwrap();
        store.upsert_push_target(sub(bob.id)).await.unwrap();

        assert!(store.list_push_targets(alice.id).await.unwrap().is_empty());
        assert_eq!(store.list_push_targets(bob.id).await.unwrap().len(), 1);
        assert!(!store
            .delete_user_push_target(alice.id, "https://push.example/1")
            .await
            .unwrap());
        assert!(store.delete_push_target("https://push.example/1").await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.add_user("alice", "a@example.com");
        store.set_unavailable(true);
        assert!(store.find_user_by_username("alice").await.is_err());
        store.set_unavailable(false);
        assert!(store.find_user_by_username("alice").await.unwrap().is_some());
    }
}
