pub mod dispatcher;
pub mod transport;
