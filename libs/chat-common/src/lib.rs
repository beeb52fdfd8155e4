pub mod channel;
pub mod id;

pub use channel::ChannelKey;
