use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use super::transport::PushTransport;
use crate::api::endpoints;
use crate::api::types::Comment;
use crate::event::Notifier;

pub const DEFAULT_MAX_RECONNECTS: u32 = 3;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
  Disconnected,
  Connecting,
  Connected,
  Reconnecting { attempt: u32 },
  Failed,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
  /// Push server root, e.g. `ws://localhost:8000`
  pub base_url: String,
  pub max_reconnects: u32,
  pub reconnect_delay: Duration,
}

impl ChannelConfig {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      max_reconnects: DEFAULT_MAX_RECONNECTS,
      reconnect_delay: DEFAULT_RECONNECT_DELAY,
    }
  }

  /// `{base}/ws/posts/{id}/?token={token}`
  pub fn post_url(&self, post_id: u64, token: &str) -> Result<Url> {
    let base = format!("{}/", self.base_url.trim_end_matches('/'));
    let mut url = Url::parse(&base)
      .and_then(|base| base.join(&endpoints::post_socket(post_id)))
      .map_err(|e| eyre!("Invalid real-time URL '{}': {}", self.base_url, e))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
  }
}

#[derive(Debug, Deserialize)]
struct PushMessage {
  #[serde(default)]
  comment: Option<Comment>,
}

/// Extract the comment from an inbound frame. Frames without one are ignored.
pub fn parse_message(text: &str) -> Result<Option<Comment>> {
  let message: PushMessage =
    serde_json::from_str(text).map_err(|e| eyre!("Failed to parse real-time message: {}", e))?;
  Ok(message.comment)
}

type CommentHandler = Arc<dyn Fn(Comment) + Send + Sync>;

struct Session {
  post_id: u64,
  task: JoinHandle<()>,
}

/// Live comment feed for one post at a time.
///
/// Runs as a single spawned task per post. Reconnects after a drop, up to
/// `max_reconnects` consecutive failures.
pub struct LiveChannel {
  transport: Arc<dyn PushTransport>,
  config: ChannelConfig,
  notifier: Notifier,
  state: Arc<watch::Sender<ChannelState>>,
  active: Arc<AtomicU64>,
  session: Mutex<Option<Session>>,
}

impl LiveChannel {
  pub fn new(transport: Arc<dyn PushTransport>, config: ChannelConfig, notifier: Notifier) -> Self {
    let (state, _) = watch::channel(ChannelState::Disconnected);
    Self {
      transport,
      config,
      notifier,
      state: Arc::new(state),
      active: Arc::new(AtomicU64::new(0)),
      session: Mutex::new(None),
    }
  }

  pub fn state(&self) -> ChannelState {
    *self.state.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
    self.state.subscribe()
  }

  /// Post the channel is currently following.
  pub fn post_id(&self) -> Option<u64> {
    self
      .session
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .map(|session| session.post_id)
  }

  /// Follow `post_id`, replacing any current session.
  ///
  /// `on_comment` receives comments for this post only.
  pub fn connect<F>(&self, post_id: u64, token: Option<String>, on_comment: F) -> Result<()>
  where
    F: Fn(Comment) + Send + Sync + 'static,
  {
    self.stop();

    let Some(token) = token else {
      self.state.send_replace(ChannelState::Failed);
      self.notifier.error("Please log in to enable real-time updates");
      return Err(eyre!("No access token for real-time updates"));
    };

    let url = self.config.post_url(post_id, &token)?;
    let session_id = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    let runner = SessionRunner {
      id: session_id,
      post_id,
      url,
      transport: self.transport.clone(),
      max_reconnects: self.config.max_reconnects,
      reconnect_delay: self.config.reconnect_delay,
      state: self.state.clone(),
      active: self.active.clone(),
      notifier: self.notifier.clone(),
      on_comment: Arc::new(on_comment),
    };

    tracing::info!(post_id, "following live comments");
    let task = tokio::spawn(runner.run());
    *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Session { post_id, task });
    Ok(())
  }

  /// Stop following. No reconnect is attempted.
  pub fn disconnect(&self) {
    if let Some(post_id) = self.stop() {
      tracing::info!(post_id, "stopped following live comments");
    }
  }

  fn stop(&self) -> Option<u64> {
    // Invalidate first so a running task can no longer publish
    self.active.fetch_add(1, Ordering::SeqCst);
    let session = self.session.lock().unwrap_or_else(PoisonError::into_inner).take()?;
    session.task.abort();
    self.state.send_replace(ChannelState::Disconnected);
    Some(session.post_id)
  }
}

impl Drop for LiveChannel {
  fn drop(&mut self) {
    self.stop();
  }
}

struct SessionRunner {
  id: u64,
  post_id: u64,
  url: Url,
  transport: Arc<dyn PushTransport>,
  max_reconnects: u32,
  reconnect_delay: Duration,
  state: Arc<watch::Sender<ChannelState>>,
  active: Arc<AtomicU64>,
  notifier: Notifier,
  on_comment: CommentHandler,
}

impl SessionRunner {
  fn is_current(&self) -> bool {
    self.active.load(Ordering::SeqCst) == self.id
  }

  /// Publish `next` unless this session has been replaced or stopped.
  fn set_state(&self, next: ChannelState) -> bool {
    let mut current = false;
    self.state.send_if_modified(|state| {
      current = self.is_current();
      if current && *state != next {
        *state = next;
        true
      } else {
        false
      }
    });
    current
  }

  async fn run(self) {
    let mut failures = 0u32;

    loop {
      if !self.set_state(ChannelState::Connecting) {
        return;
      }

      match self.transport.connect(self.url.clone()).await {
        Ok(mut stream) => {
          failures = 0;
          if !self.set_state(ChannelState::Connected) {
            return;
          }
          tracing::info!(post_id = self.post_id, "live comments connected");
          self.notifier.success("Connected to real-time updates");

          while let Some(frame) = stream.next().await {
            if !self.is_current() {
              return;
            }
            match frame {
              Ok(text) => self.handle_frame(&text),
              Err(e) => {
                tracing::warn!(post_id = self.post_id, "live comments error: {}", e);
                self.notifier.error("Real-time connection error");
                break;
              }
            }
          }
          tracing::info!(post_id = self.post_id, "live comments dropped");
        }
        Err(e) => {
          tracing::warn!(post_id = self.post_id, "live comments connect failed: {}", e);
        }
      }

      if failures >= self.max_reconnects {
        if self.set_state(ChannelState::Failed) {
          self.notifier.error("Failed to reconnect to real-time updates");
        }
        return;
      }

      failures += 1;
      if !self.set_state(ChannelState::Reconnecting { attempt: failures }) {
        return;
      }
      tracing::debug!(post_id = self.post_id, attempt = failures, "reconnecting");
      tokio::time::sleep(self.reconnect_delay).await;
    }
  }

  fn handle_frame(&self, text: &str) {
    match parse_message(text) {
      Ok(Some(comment)) if comment.post == self.post_id => (self.on_comment)(comment),
      Ok(Some(comment)) => {
        tracing::debug!(post_id = self.post_id, other = comment.post, "dropping comment for another post");
      }
      Ok(None) => {}
      Err(e) => {
        tracing::warn!("{}", e);
        self.notifier.error("Error receiving real-time update");
      }
    }
  }
}
