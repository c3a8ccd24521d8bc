//! Transport for the push channel.

use color_eyre::{eyre::eyre, Result};
use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Text frames from one connection. The stream ends when the server closes.
pub type MessageStream = BoxStream<'static, Result<String>>;

/// Opens push connections. Swappable so reconnect logic can be tested
/// without a server.
pub trait PushTransport: Send + Sync {
  fn connect(&self, url: Url) -> BoxFuture<'static, Result<MessageStream>>;
}

/// WebSocket transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

impl PushTransport for WsTransport {
  fn connect(&self, url: Url) -> BoxFuture<'static, Result<MessageStream>> {
    async move {
      let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| eyre!("Failed to connect to real-time updates: {}", e))?;

      let stream = socket
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| async move {
          match msg {
            Ok(Message::Text(text)) => Some(Ok(text)),
            // Pings are answered by the socket itself
            Ok(_) => None,
            Err(e) => Some(Err(eyre!("Real-time connection error: {}", e))),
          }
        });

      Ok(stream.boxed())
    }
    .boxed()
  }
}
