//! Connection registry: the single live connection per username.
//!
//! Every connection owns a bounded outbound queue drained by its session
//! task. The registry holds the sending half; removing an entry drops that
//! sender, which the session observes as a closed queue and shuts the socket.
//! All writes are `try_send`, so the lock is never held across an await.

use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use chat_common::id::{prefix, prefixed_ulid};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::events::ServerEvent;

/// The registry's half of a live connection.
pub struct ConnectionHandle {
    pub connection_id: String,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<Utf8Bytes>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its session drains. `buffer` bounds
    /// how far a slow client may fall behind before it is evicted.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = Self {
            connection_id: prefixed_ulid(prefix::CONNECTION),
            connected_at: Utc::now(),
            tx,
        };
        (handle, rx)
    }

    fn push(&self, frame: Utf8Bytes) -> Result<(), TrySendError<Utf8Bytes>> {
        self.tx.try_send(frame)
    }
}

/// Username → connection map guarded by one lock.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Register `handle` as the only connection for `username`, closing any
    /// previous one, then announce presence to everyone.
    pub fn connect(&self, username: &str, handle: ConnectionHandle) {
        let mut map = self.connections.lock();
        let connection_id = handle.connection_id.clone();
        if let Some(previous) = map.insert(username.to_string(), handle) {
            tracing::info!(
                %username,
                replaced = %previous.connection_id,
                %connection_id,
                "connection replaced"
            );
        }
        broadcast_presence(&mut map);
    }

    /// Remove whatever connection `username` has. Idempotent.
    pub fn disconnect(&self, username: &str) {
        let mut map = self.connections.lock();
        map.remove(username);
        broadcast_presence(&mut map);
    }

    /// Session teardown: remove `username` only if it is still bound to
    /// `connection_id`. A session that was replaced must not evict its
    /// successor. Returns whether an entry was removed.
    pub fn release(&self, username: &str, connection_id: &str) -> bool {
        let mut map = self.connections.lock();
        match map.get(username) {
            Some(current) if current.connection_id != connection_id => false,
            Some(_) => {
                map.remove(username);
                broadcast_presence(&mut map);
                true
            }
            // Already evicted after a failed write; presence has not been
            // announced for that yet.
            None => {
                broadcast_presence(&mut map);
                false
            }
        }
    }

    /// Queue `frame` for `username`. `false` if the user is offline or the
    /// write failed, in which case the connection is evicted.
    pub fn send_to(&self, username: &str, frame: &Utf8Bytes) -> bool {
        let mut map = self.connections.lock();
        let Some(handle) = map.get(username) else {
            return false;
        };
        match handle.push(frame.clone()) {
            Ok(()) => true,
            Err(err) => {
                evict(&mut map, username, &err);
                false
            }
        }
    }

    /// Queue `frame` for every connection except `exclude`, evicting any
    /// whose write fails. Returns how many connections accepted it.
    pub fn broadcast(&self, frame: &Utf8Bytes, exclude: Option<&str>) -> usize {
        let mut map = self.connections.lock();
        fan_out(&mut map, frame, exclude)
    }

    /// Serialize and send an event to one user.
    pub fn send_event(&self, username: &str, event: &ServerEvent) -> bool {
        match event.to_frame() {
            Ok(frame) => self.send_to(username, &frame),
            Err(err) => {
                tracing::error!(%err, "failed to encode gateway event");
                false
            }
        }
    }

    /// Currently connected usernames, sorted.
    pub fn presence_snapshot(&self) -> Vec<String> {
        sorted_usernames(&self.connections.lock())
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.connections.lock().contains_key(username)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_usernames(map: &HashMap<String, ConnectionHandle>) -> Vec<String> {
    let mut users: Vec<String> = map.keys().cloned().collect();
    users.sort();
    users
}

fn fan_out(
    map: &mut HashMap<String, ConnectionHandle>,
    frame: &Utf8Bytes,
    exclude: Option<&str>,
) -> usize {
    let mut failed = Vec::new();
    let mut delivered = 0;
    for (username, handle) in map.iter() {
        if exclude == Some(username.as_str()) {
            continue;
        }
        match handle.push(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(err) => failed.push((username.clone(), err)),
        }
    }
    for (username, err) in failed {
        evict(map, &username, &err);
    }
    delivered
}

fn evict(map: &mut HashMap<String, ConnectionHandle>, username: &str, err: &TrySendError<Utf8Bytes>) {
    if let Some(handle) = map.remove(username) {
        let reason = match err {
            TrySendError::Full(_) => "outbound queue full",
            TrySendError::Closed(_) => "connection closed",
        };
        tracing::debug!(
            %username,
            connection_id = %handle.connection_id,
            reason,
            "evicting connection"
        );
    }
}

/// Send the current presence set to every connection. Runs under the
/// registry lock so the snapshot matches the transition that caused it.
fn broadcast_presence(map: &mut HashMap<String, ConnectionHandle>) {
    let event = ServerEvent::UsersUpdate {
        users: sorted_usernames(map),
    };
    match event.to_frame() {
        Ok(frame) => {
            fan_out(map, &frame, None);
        }
        Err(err) => tracing::error!(%err, "failed to encode presence update"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn decode(frame: Utf8Bytes) -> Value {
        serde_json::from_str(frame.as_str()).unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(decode(frame));
        }
        out
    }

    #[test]
    fn connect_announces_presence_to_everyone() {
        let registry = ConnectionRegistry::new();
        let (alice, mut alice_rx) = ConnectionHandle::new(8);
        let (bob, mut bob_rx) = ConnectionHandle::new(8);

        registry.connect("alice", alice);
        registry.connect("bob", bob);

        let alice_frames = drain(&mut alice_rx);
        assert_eq!(alice_frames.len(), 2);
        assert_eq!(alice_frames[1]["type"], "users_update");
        assert_eq!(alice_frames[1]["users"], serde_json::json!(["alice", "bob"]));

        let bob_frames = drain(&mut bob_rx);
        assert_eq!(bob_frames.len(), 1);
        assert_eq!(registry.presence_snapshot(), vec!["alice", "bob"]);
    }

    #[test]
    fn reconnect_replaces_and_closes_previous() {
        let registry = ConnectionRegistry::new();
        let (first, mut first_rx) = ConnectionHandle::new(8);
        let (second, mut second_rx) = ConnectionHandle::new(8);
        let first_id = first.connection_id.clone();

        registry.connect("alice", first);
        registry.connect("alice", second);

        assert_eq!(registry.connection_count(), 1);
        drain(&mut first_rx);
        assert!(matches!(
            first_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        // The replaced session's teardown leaves the successor in place.
        assert!(!registry.release("alice", &first_id));
        assert!(registry.is_online("alice"));
        assert!(registry.send_to("alice", &Utf8Bytes::from_static("{}")));
        assert!(!drain(&mut second_rx).is_empty());
    }

    #[test]
    fn release_removes_current_connection() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new(8);
        let id = handle.connection_id.clone();
        registry.connect("alice", handle);

        assert!(registry.release("alice", &id));
        assert!(!registry.is_online("alice"));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (bob, mut bob_rx) = ConnectionHandle::new(8);
        registry.connect("bob", bob);
        drain(&mut bob_rx);

        registry.disconnect("ghost");
        registry.disconnect("ghost");

        let frames = drain(&mut bob_rx);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f["users"] == serde_json::json!(["bob"])));
        assert_eq!(registry.presence_snapshot(), vec!["bob"]);
    }

    #[test]
    fn send_to_offline_user_is_false() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to("nobody", &Utf8Bytes::from_static("{}")));
    }

    #[test]
    fn send_to_closed_connection_evicts_it() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = ConnectionHandle::new(8);
        registry.connect("alice", handle);
        drop(rx);

        assert!(!registry.send_to("alice", &Utf8Bytes::from_static("{}")));
        assert!(!registry.is_online("alice"));
    }

    #[test]
    fn slow_consumer_is_evicted_on_full_queue() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new(1);
        // The presence update from connect fills the single slot.
        registry.connect("slow", handle);

        assert!(!registry.send_to("slow", &Utf8Bytes::from_static("{}")));
        assert!(!registry.is_online("slow"));
    }

    #[test]
    fn broadcast_honours_exclude_and_evicts_failures() {
        let registry = ConnectionRegistry::new();
        let (alice, mut alice_rx) = ConnectionHandle::new(8);
        let (bob, mut bob_rx) = ConnectionHandle::new(8);
        let (carol, carol_rx) = ConnectionHandle::new(8);
        registry.connect("alice", alice);
        registry.connect("bob", bob);
        registry.connect("carol", carol);
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drop(carol_rx);

        let frame = Utf8Bytes::from_static(r#"{"type":"message"}"#);
        let delivered = registry.broadcast(&frame, Some("alice"));

        assert_eq!(delivered, 1);
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx).len(), 1);
        assert!(!registry.is_online("carol"));
    }
}
