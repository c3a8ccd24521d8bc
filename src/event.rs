use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Success,
  Error,
}

/// User-facing message about an action or a failure (toast equivalent)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub level: NoticeLevel,
  pub message: String,
}

impl fmt::Display for Notice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let tag = match self.level {
      NoticeLevel::Success => "ok",
      NoticeLevel::Error => "error",
    };
    write!(f, "[{}] {}", tag, self.message)
  }
}

/// Sending half of the notice stream, shared by every store.
#[derive(Debug, Clone)]
pub struct Notifier {
  tx: Option<mpsc::UnboundedSender<Notice>>,
}

impl Notifier {
  /// Create a notifier and the handler that receives its notices.
  pub fn channel() -> (Self, NoticeHandler) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx: Some(tx) }, NoticeHandler { rx })
  }

  /// Notifier that only logs.
  pub fn silent() -> Self {
    Self { tx: None }
  }

  pub fn success(&self, message: impl Into<String>) {
    self.send(NoticeLevel::Success, message.into());
  }

  pub fn error(&self, message: impl Into<String>) {
    self.send(NoticeLevel::Error, message.into());
  }

  fn send(&self, level: NoticeLevel, message: String) {
    match level {
      NoticeLevel::Error => tracing::warn!(%message, "notice"),
      NoticeLevel::Success => tracing::debug!(%message, "notice"),
    }
    if let Some(tx) = &self.tx {
      // Ignore send errors - nobody may be listening
      let _ = tx.send(Notice { level, message });
    }
  }
}

/// Receiving half of the notice stream
pub struct NoticeHandler {
  rx: mpsc::UnboundedReceiver<Notice>,
}

impl NoticeHandler {
  /// Receive the next notice
  pub async fn next(&mut self) -> Option<Notice> {
    self.rx.recv().await
  }

  /// Everything queued so far, without waiting.
  pub fn drain(&mut self) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(notice) = self.rx.try_recv() {
      notices.push(notice);
    }
    notices
  }
}
