pub mod group;
pub mod message;
pub mod push_subscription;
pub mod user;
