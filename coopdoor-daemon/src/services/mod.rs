pub mod backoff;
pub mod command_channel;
pub mod connection_service;
pub mod link;
pub mod state_cache;
pub mod transport;

pub use command_channel::CommandChannel;
pub use connection_service::{ConnectionService, DeviceCommand};
pub use state_cache::StateCache;
