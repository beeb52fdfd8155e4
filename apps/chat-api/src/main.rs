use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_api::config::{Config, DEV_JWT_SECRET};
use chat_api::db::memory::MemoryStore;
use chat_api::db::postgres::PgStore;
use chat_api::db::store::ChatStore;
use chat_api::push::transport::{LogTransport, PushTransport, WebPushTransport};
use chat_api::AppState;

/// How long queued pushes may run after the server stops accepting requests.
const PUSH_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let store: Arc<dyn ChatStore> = match &config.database_url {
        Some(url) => {
            let db = chat_api::db::pool::connect(url).expect("failed to create database pool");
            Arc::new(PgStore::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    if config.jwt_secret == DEV_JWT_SECRET {
        tracing::warn!("SECRET_KEY not set, using the development token secret");
    }

    let transport: Arc<dyn PushTransport> =
        if config.push.vapid_private_key_pem.is_some() && config.push.vapid_public_key.is_some() {
            Arc::new(
                WebPushTransport::from_config(&config.push)
                    .expect("failed to configure web push"),
            )
        } else {
            tracing::warn!("VAPID keys not configured, push notifications are logged only");
            Arc::new(LogTransport)
        };

    let cors = cors_layer(&config.allowed_origins);

    tracing::info!(
        workers = config.push.workers,
        queue = config.push.queue_capacity,
        "chat-api configured"
    );

    let (state, push_workers) = AppState::new(store, config, transport);
    let push = state.push.clone();

    let app = Router::new()
        .merge(chat_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "chat-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Open WebSocket sessions may still hold dispatcher handles.
    push.close();
    push_workers.drain(PUSH_DRAIN_TIMEOUT).await;
    tracing::info!("chat-api stopped");
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
