pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod push;
pub mod routes;

use std::sync::Arc;

use config::Config;
use db::store::ChatStore;
use gateway::groups::GroupResolver;
use gateway::registry::ConnectionRegistry;
use gateway::router::MessageRouter;
use push::dispatcher::{PushDispatcher, PushWorkers};
use push::transport::PushTransport;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub groups: GroupResolver,
    pub push: PushDispatcher,
    pub router: Arc<MessageRouter>,
}

impl AppState {
    /// Wire up the gateway services and start the push workers. Must be
    /// called inside a Tokio runtime.
    pub fn new(
        store: Arc<dyn ChatStore>,
        config: Config,
        transport: Arc<dyn PushTransport>,
    ) -> (Self, PushWorkers) {
        let registry = Arc::new(ConnectionRegistry::new());
        let groups = GroupResolver::new(store.clone());
        let (push, workers) = PushDispatcher::start(
            store.clone(),
            transport,
            config.push.workers,
            config.push.queue_capacity,
        );
        let router = Arc::new(MessageRouter::new(
            store.clone(),
            registry.clone(),
            groups.clone(),
            push.clone(),
        ));

        let state = Self {
            store,
            config: Arc::new(config),
            registry,
            groups,
            push,
            router,
        };
        (state, workers)
    }
}
