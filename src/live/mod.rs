//! Real-time comment updates for the open post.

mod channel;
mod transport;

pub use channel::{
  parse_message, ChannelConfig, ChannelState, LiveChannel, DEFAULT_MAX_RECONNECTS,
  DEFAULT_RECONNECT_DELAY,
};
pub use transport::{MessageStream, PushTransport, WsTransport};
