#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use chat_api::auth::tokens;
use chat_api::config::Config;
use chat_api::db::memory::MemoryStore;
use chat_api::models::push_subscription::PushSubscription;
use chat_api::models::user::User;
use chat_api::push::transport::{PushError, PushTransport};
use chat_api::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Push transport that records every attempt. Endpoints listed in
/// `outcomes` fail with the given error; all others succeed.
#[derive(Default)]
pub struct RecordingTransport {
    pub outcomes: Mutex<HashMap<String, PushError>>,
    pub attempts: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    pub fn fail(&self, endpoint: &str, err: PushError) {
        self.outcomes.lock().insert(endpoint.to_string(), err);
    }

    pub fn attempts(&self) -> Vec<(String, String)> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send(&self, target: &PushSubscription, payload: &str) -> Result<(), PushError> {
        self.attempts
            .lock()
            .push((target.endpoint.clone(), payload.to_string()));
        match self.outcomes.lock().get(&target.endpoint) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub push: Arc<RecordingTransport>,
}

impl TestContext {
    /// Create a user and an access token for it.
    pub async fn user(&self, username: &str) -> (User, String) {
        let user = self
            .store
            .add_user(username, &format!("{username}@example.com"));
        let token = tokens::issue_access_token(
            &self.state.config.jwt_secret,
            username,
            tokens::ACCESS_TTL_SECS,
        )
        .expect("issue access token");
        (user, token)
    }
}

/// Build an AppState on the in-memory store and a recording push transport.
pub fn test_context() -> TestContext {
    let store = Arc::new(MemoryStore::new());
    let push = Arc::new(RecordingTransport::default());

    let mut config = Config::local();
    config.push.vapid_public_key = Some("BTestPublicKey".to_string());
    config.push.workers = 2;

    let (state, _workers) = AppState::new(store.clone(), config, push.clone());

    TestContext {
        state,
        store,
        push,
    }
}

pub fn test_app() -> (Router, TestContext) {
    let ctx = test_context();
    let app = chat_api::routes::router().with_state(ctx.state.clone());
    (app, ctx)
}

/// Start a real TCP server for WebSocket testing.
pub async fn start_server() -> (SocketAddr, TestContext) {
    let (app, ctx) = test_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, ctx)
}

pub async fn connect(addr: SocketAddr, username: &str) -> WsClient {
    let url = format!("ws://{addr}/ws/{username}");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

/// Next JSON text frame, or `None` if nothing arrives within `wait`.
pub async fn next_json(ws: &mut WsClient, wait: Duration) -> Option<serde_json::Value> {
    loop {
        let msg = time::timeout(wait, ws.next()).await.ok()??.ok()?;
        match msg {
            tungstenite::Message::Text(text) => {
                return Some(serde_json::from_str(text.as_str()).expect("json frame"));
            }
            tungstenite::Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Next frame that is not a presence update.
pub async fn next_chat(ws: &mut WsClient) -> Option<serde_json::Value> {
    loop {
        let value = next_json(ws, Duration::from_secs(2)).await?;
        if value["type"] != "users_update" {
            return Some(value);
        }
    }
}

/// Skip frames until a presence update listing exactly `users` arrives.
pub async fn wait_for_presence(ws: &mut WsClient, users: &[&str]) {
    loop {
        let value = next_json(ws, Duration::from_secs(2))
            .await
            .expect("presence update");
        if value["type"] == "users_update" && value["users"] == serde_json::json!(users) {
            return;
        }
    }
}

/// Poll until `check` holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
