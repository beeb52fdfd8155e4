//! Group membership lookups for delivery and access checks.
//!
//! Membership is read from the store on every call. A member added or removed
//! through the REST API is reflected on the very next group message.

use std::sync::Arc;

use crate::db::store::ChatStore;
use crate::error::ApiError;
use crate::models::group::GroupMembershipView;

/// Result of checking a user against a group.
#[derive(Debug)]
pub enum GroupAccess {
    Granted(GroupMembershipView),
    NotFound,
    NotMember,
}

#[derive(Clone)]
pub struct GroupResolver {
    store: Arc<dyn ChatStore>,
}

impl GroupResolver {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Current members of `group_id`, or `None` if the group is gone.
    pub async fn resolve_members(
        &self,
        group_id: i32,
    ) -> Result<Option<GroupMembershipView>, ApiError> {
        self.store.resolve_group_members(group_id).await
    }

    /// Resolve the group and require `username` to be one of its members.
    pub async fn check_member(&self, group_id: i32, username: &str) -> Result<GroupAccess, ApiError> {
        let access = match self.resolve_members(group_id).await? {
            None => GroupAccess::NotFound,
            Some(view) if view.is_member(username) => GroupAccess::Granted(view),
            Some(_) => GroupAccess::NotMember,
        };
        Ok(access)
    }

    /// Like [`check_member`](Self::check_member) but mapped to REST errors.
    /// Non-members get 403, a missing group 404.
    pub async fn require_member(
        &self,
        group_id: i32,
        username: &str,
    ) -> Result<GroupMembershipView, ApiError> {
        match self.check_member(group_id, username).await? {
            GroupAccess::Granted(view) => Ok(view),
            GroupAccess::NotFound => Err(ApiError::not_found("Group not found")),
            GroupAccess::NotMember => {
                Err(ApiError::forbidden("You are not a member of this group"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::group::{MemberRole, NewGroupChat};

    async fn fixture() -> (Arc<MemoryStore>, GroupResolver, i32) {
        let store = Arc::new(MemoryStore::new());
        let alice = store.add_user("alice", "alice@example.com");
        store.add_user("bob", "bob@example.com");
        store.add_user("carol", "carol@example.com");
        let created = store
            .create_group(
                NewGroupChat {
                    name: "team",
                    description: None,
                    is_private: false,
                    max_members: 50,
                    created_by: alice.id,
                },
                &["bob".to_string()],
            )
            .await
            .unwrap();
        let resolver = GroupResolver::new(store.clone());
        (store, resolver, created.group.id)
    }

    #[tokio::test]
    async fn resolves_members_with_roles() {
        let (_, resolver, group_id) = fixture().await;
        let view = resolver.resolve_members(group_id).await.unwrap().unwrap();
        assert_eq!(view.group_name, "team");
        assert_eq!(view.usernames().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert_eq!(view.member("alice").unwrap().role, MemberRole::Owner);
        assert_eq!(view.member("bob").unwrap().role, MemberRole::Member);
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let (_, resolver, _) = fixture().await;
        assert!(resolver.resolve_members(999).await.unwrap().is_none());
        assert!(matches!(
            resolver.check_member(999, "alice").await.unwrap(),
            GroupAccess::NotFound
        ));
    }

    #[tokio::test]
    async fn membership_changes_apply_immediately() {
        let (store, resolver, group_id) = fixture().await;
        assert!(matches!(
            resolver.check_member(group_id, "carol").await.unwrap(),
            GroupAccess::NotMember
        ));

        let carol = store.find_user_by_username("carol").await.unwrap().unwrap();
        store
            .add_group_member(group_id, carol.id, MemberRole::Member)
            .await
            .unwrap();
        assert!(matches!(
            resolver.check_member(group_id, "carol").await.unwrap(),
            GroupAccess::Granted(_)
        ));

        store.leave_group(group_id, carol.id).await.unwrap();
        let err = resolver.require_member(group_id, "carol").await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
    }
}
