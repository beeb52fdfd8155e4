//! Classify inbound frames and deliver them: public, private, or group.
//!
//! Every accepted message is persisted before any delivery, so peers only
//! ever see content that was durably recorded, stamped with the stored
//! timestamp. Rejected frames are dropped without a reply.

use std::sync::Arc;

use chat_common::ChannelKey;
use serde_json::json;

use crate::db::store::ChatStore;
use crate::error::ApiError;
use crate::models::message::NewMessage;
use crate::models::user::User;
use crate::push::dispatcher::PushDispatcher;

use super::events::{Envelope, EnvelopeError, ServerEvent};
use super::groups::{GroupAccess, GroupResolver};
use super::registry::ConnectionRegistry;

/// What became of one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Persisted; `online` counts the connections that accepted the frame.
    Delivered { message_id: i32, online: usize },
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed(EnvelopeError),
    UnknownSender,
    GroupNotFound,
    NotAMember,
    StoreFailure,
}

pub struct MessageRouter {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
    groups: GroupResolver,
    push: PushDispatcher,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: Arc<ConnectionRegistry>,
        groups: GroupResolver,
        push: PushDispatcher,
    ) -> Self {
        Self {
            store,
            registry,
            groups,
            push,
        }
    }

    /// Handle one text frame from `sender`. Never fails; problems are logged.
    pub async fn handle_frame(&self, sender: &str, text: &str) -> RouteOutcome {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(%sender, %err, "dropping inbound frame");
                return RouteOutcome::Dropped(DropReason::Malformed(err));
            }
        };

        match self.route(sender, envelope).await {
            Ok(outcome) => {
                if let RouteOutcome::Dropped(reason) = &outcome {
                    tracing::debug!(%sender, ?reason, "message dropped");
                }
                outcome
            }
            Err(err) => {
                tracing::warn!(%sender, %err, "message not delivered, store error");
                RouteOutcome::Dropped(DropReason::StoreFailure)
            }
        }
    }

    pub async fn route(&self, sender: &str, envelope: Envelope) -> Result<RouteOutcome, ApiError> {
        let Some(user) = self.store.find_user_by_username(sender).await? else {
            return Ok(RouteOutcome::Dropped(DropReason::UnknownSender));
        };

        match envelope {
            Envelope::Private { recipient, content } => {
                self.route_private(&user, &recipient, &content).await
            }
            Envelope::Group { group_id, content } => {
                self.route_group(&user, group_id, &content).await
            }
            Envelope::Public { content } => self.route_public(&user, &content).await,
        }
    }

    async fn route_private(
        &self,
        sender: &User,
        recipient: &str,
        content: &str,
    ) -> Result<RouteOutcome, ApiError> {
        let channel = ChannelKey::private(&sender.username, recipient).to_string();
        let stored = self
            .store
            .insert_message(NewMessage {
                content,
                sender_id: sender.id,
                channel: &channel,
                group_id: None,
            })
            .await?;

        let event = ServerEvent::PrivateMessage {
            sender: sender.username.clone(),
            recipient: recipient.to_string(),
            content: stored.content.clone(),
            timestamp: stored.timestamp,
            is_private: true,
        };
        let frame = event.to_frame().map_err(|e| ApiError::internal(e.to_string()))?;

        let mut online = usize::from(self.registry.send_to(recipient, &frame));
        // Echo so the sender sees the stored timestamp.
        if recipient != sender.username {
            online += usize::from(self.registry.send_to(&sender.username, &frame));
        }

        self.push.dispatch(
            recipient,
            format!("New message from {}", sender.username),
            content,
            json!({ "type": "private", "sender": sender.username }),
        );

        Ok(RouteOutcome::Delivered {
            message_id: stored.id,
            online,
        })
    }

    async fn route_group(
        &self,
        sender: &User,
        group_id: i32,
        content: &str,
    ) -> Result<RouteOutcome, ApiError> {
        let view = match self.groups.check_member(group_id, &sender.username).await? {
            GroupAccess::Granted(view) => view,
            GroupAccess::NotFound => return Ok(RouteOutcome::Dropped(DropReason::GroupNotFound)),
            GroupAccess::NotMember => return Ok(RouteOutcome::Dropped(DropReason::NotAMember)),
        };

        let channel = ChannelKey::group(group_id).to_string();
        let stored = self
            .store
            .insert_message(NewMessage {
                content,
                sender_id: sender.id,
                channel: &channel,
                group_id: Some(group_id),
            })
            .await?;

        let event = ServerEvent::GroupMessage {
            sender: sender.username.clone(),
            group_id,
            group_name: view.group_name.clone(),
            content: stored.content.clone(),
            timestamp: stored.timestamp,
        };
        let frame = event.to_frame().map_err(|e| ApiError::internal(e.to_string()))?;

        let online = view
            .usernames()
            .filter(|member| self.registry.send_to(member, &frame))
            .count();

        let title = format!("New message in {} from {}", view.group_name, sender.username);
        for member in view.usernames().filter(|m| *m != sender.username) {
            self.push.dispatch(
                member,
                title.clone(),
                content,
                json!({
                    "type": "group",
                    "group_id": group_id,
                    "group_name": view.group_name,
                    "sender": sender.username,
                }),
            );
        }

        Ok(RouteOutcome::Delivered {
            message_id: stored.id,
            online,
        })
    }

    async fn route_public(&self, sender: &User, content: &str) -> Result<RouteOutcome, ApiError> {
        let stored = self
            .store
            .insert_message(NewMessage {
                content,
                sender_id: sender.id,
                channel: chat_common::channel::GENERAL,
                group_id: None,
            })
            .await?;

        let event = ServerEvent::Message {
            sender: sender.username.clone(),
            content: stored.content.clone(),
            timestamp: stored.timestamp,
        };
        let frame = event.to_frame().map_err(|e| ApiError::internal(e.to_string()))?;
        let online = self.registry.broadcast(&frame, None);

        self.push.dispatch_all_except(
            &sender.username,
            format!("New message in general from {}", sender.username),
            content,
            json!({ "type": "public", "sender": sender.username }),
        );

        Ok(RouteOutcome::Delivered {
            message_id: stored.id,
            online,
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::ws::Utf8Bytes;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::gateway::registry::ConnectionHandle;
    use crate::models::group::NewGroupChat;
    use crate::push::transport::LogTransport;

    struct Harness {
        store: Arc<MemoryStore>,
        registry: Arc<ConnectionRegistry>,
        router: MessageRouter,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        for name in ["alice", "bob", "carol"] {
            store.add_user(name, &format!("{name}@example.com"));
        }
        let registry = Arc::new(ConnectionRegistry::new());
        let (push, _workers) =
            PushDispatcher::start(store.clone(), Arc::new(LogTransport), 1, 16);
        let router = MessageRouter::new(
            store.clone(),
            registry.clone(),
            GroupResolver::new(store.clone()),
            push,
        );
        Harness {
            store,
            registry,
            router,
        }
    }

    fn connect(registry: &ConnectionRegistry, username: &str) -> mpsc::Receiver<Utf8Bytes> {
        let (handle, rx) = ConnectionHandle::new(32);
        registry.connect(username, handle);
        rx
    }

    /// Chat frames received so far, presence updates skipped.
    fn chat_frames(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let value: Value = serde_json::from_str(frame.as_str()).unwrap();
            if value["type"] != "users_update" {
                out.push(value);
            }
        }
        out
    }

    #[tokio::test]
    async fn public_message_reaches_everyone_including_sender() {
        let h = harness();
        let mut rx: Vec<_> = ["alice", "bob", "carol"]
            .iter()
            .map(|u| connect(&h.registry, u))
            .collect();

        let outcome = h.router.handle_frame("alice", r#"{"content":"hi"}"#).await;
        assert!(matches!(outcome, RouteOutcome::Delivered { online: 3, .. }));

        let received: Vec<Value> = rx.iter_mut().flat_map(chat_frames).collect();
        assert_eq!(received.len(), 3);
        for frame in &received {
            assert_eq!(frame["type"], "message");
            assert_eq!(frame["content"], "hi");
            assert_eq!(frame["timestamp"], received[0]["timestamp"]);
        }
        assert_eq!(h.store.messages()[0].channel, "general");
    }

    #[tokio::test]
    async fn private_message_goes_to_recipient_and_echoes() {
        let h = harness();
        let mut alice = connect(&h.registry, "alice");
        let mut bob = connect(&h.registry, "bob");
        let mut carol = connect(&h.registry, "carol");

        h.router
            .handle_frame("alice", r#"{"type":"private","recipient":"bob","content":"x"}"#)
            .await;
        h.router
            .handle_frame("bob", r#"{"type":"private","recipient":"alice","content":"y"}"#)
            .await;

        let a = chat_frames(&mut alice);
        let b = chat_frames(&mut bob);
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert_eq!(a[0]["isPrivate"], true);
        assert_eq!(a[0]["timestamp"], b[0]["timestamp"]);
        assert!(chat_frames(&mut carol).is_empty());

        let stored = h.store.messages();
        assert_eq!(stored[0].channel, stored[1].channel);
        assert_eq!(stored[0].channel, "private_alice_bob");
    }

    #[tokio::test]
    async fn private_message_to_offline_user_is_still_stored() {
        let h = harness();
        let mut alice = connect(&h.registry, "alice");

        let outcome = h
            .router
            .handle_frame("alice", r#"{"type":"private","recipient":"bob","content":"x"}"#)
            .await;

        assert!(matches!(outcome, RouteOutcome::Delivered { online: 1, .. }));
        assert_eq!(chat_frames(&mut alice).len(), 1);
        assert_eq!(h.store.messages().len(), 1);
    }

    #[tokio::test]
    async fn group_message_reaches_members_only() {
        let h = harness();
        let alice = h.store.find_user_by_username("alice").await.unwrap().unwrap();
        let group = h
            .store
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
            .unwrap()
            .group;
        let mut alice_rx = connect(&h.registry, "alice");
        let mut bob_rx = connect(&h.registry, "bob");
        let mut carol_rx = connect(&h.registry, "carol");

        let frame = format!(r#"{{"type":"group","group_id":{},"content":"g"}}"#, group.id);
        let outcome = h.router.handle_frame("alice", &frame).await;
        assert!(matches!(outcome, RouteOutcome::Delivered { online: 2, .. }));

        let b = chat_frames(&mut bob_rx);
        assert_eq!(b.len(), 1);
        assert_eq!(b[0]["type"], "group_message");
        assert_eq!(b[0]["group_name"], "team");
        assert_eq!(chat_frames(&mut alice_rx).len(), 1);
        assert!(chat_frames(&mut carol_rx).is_empty());
        assert_eq!(h.store.messages()[0].group_id, Some(group.id));
    }

    #[tokio::test]
    async fn non_member_group_message_is_dropped_without_trace() {
        let h = harness();
        let alice = h.store.find_user_by_username("alice").await.unwrap().unwrap();
        let group = h
            .store
            .create_group(
                NewGroupChat {
                    name: "team",
                    description: None,
                    is_private: true,
                    max_members: 50,
                    created_by: alice.id,
                },
                &[],
            )
            .await
            .unwrap()
            .group;
        let mut alice_rx = connect(&h.registry, "alice");
        let mut carol_rx = connect(&h.registry, "carol");

        let frame = format!(r#"{{"type":"group","group_id":{},"content":"g"}}"#, group.id);
        let outcome = h.router.handle_frame("carol", &frame).await;

        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::NotAMember));
        assert!(h.store.messages().is_empty());
        assert!(chat_frames(&mut alice_rx).is_empty());
        assert!(chat_frames(&mut carol_rx).is_empty());

        let outcome = h
            .router
            .handle_frame("alice", r#"{"type":"group","group_id":404,"content":"g"}"#)
            .await;
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::GroupNotFound));
    }

    #[tokio::test]
    async fn malformed_and_unknown_sender_are_dropped() {
        let h = harness();
        assert_eq!(
            h.router.handle_frame("alice", "nope").await,
            RouteOutcome::Dropped(DropReason::Malformed(EnvelopeError::Malformed))
        );
        assert_eq!(
            h.router.handle_frame("mallory", r#"{"content":"hi"}"#).await,
            RouteOutcome::Dropped(DropReason::UnknownSender)
        );
        assert!(h.store.messages().is_empty());
    }

    #[tokio::test]
    async fn store_failure_delivers_nothing() {
        let h = harness();
        let mut bob = connect(&h.registry, "bob");
        h.store.set_unavailable(true);

        let outcome = h.router.handle_frame("alice", r#"{"content":"lost"}"#).await;

        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::StoreFailure));
        assert!(chat_frames(&mut bob).is_empty());
    }

    #[tokio::test]
    async fn sequential_frames_keep_order() {
        let h = harness();
        h.router.handle_frame("alice", r#"{"content":"1"}"#).await;
        h.router.handle_frame("alice", r#"{"content":"2"}"#).await;

        let stored = h.store.messages();
        assert_eq!(stored[0].content, "1");
        assert_eq!(stored[1].content, "2");
        assert!(stored[0].timestamp <= stored[1].timestamp);
    }
}
