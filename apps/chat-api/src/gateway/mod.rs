pub mod events;
pub mod groups;
pub mod registry;
pub mod router;
pub mod server;
