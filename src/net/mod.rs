// Network layer module
// Wire message schema and the per-socket session transport

pub mod messages;
pub mod session;

pub use messages::{
    AuthoritativeUpdate, ChannelMessage, Frequency, KillMessage, NetworkMessage, TextMessage,
};
pub use session::Session;
