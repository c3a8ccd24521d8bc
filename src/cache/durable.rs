//! Fail-soft wrapper around a storage backend.
//!
//! The backend is opened lazily on first use. If it cannot be opened, the
//! store disables itself and every operation becomes a miss or a no-op.
//! No method here returns an error: failures go to the [`CacheObserver`].

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, OnceLock};

use super::storage::{CacheStorage, NoopStorage, RawEntry};
use super::traits::{CacheEntry, CacheEvent, CacheObserver, Collection, TracingObserver};

type Opener = Box<dyn Fn() -> Result<Box<dyn CacheStorage>> + Send + Sync>;

enum Backend {
  Ready(Box<dyn CacheStorage>),
  Disabled,
}

pub struct DurableStore {
  opener: Opener,
  backend: OnceLock<Backend>,
  observer: Arc<dyn CacheObserver>,
}

impl DurableStore {
  /// Store whose backend is produced by `opener` on first access.
  pub fn lazy<F>(opener: F) -> Self
  where
    F: Fn() -> Result<Box<dyn CacheStorage>> + Send + Sync + 'static,
  {
    Self {
      opener: Box::new(opener),
      backend: OnceLock::new(),
      observer: Arc::new(TracingObserver),
    }
  }

  /// Store over an already opened backend.
  pub fn with_backend(storage: impl CacheStorage + 'static) -> Self {
    Self {
      opener: Box::new(|| Ok(Box::new(NoopStorage) as Box<dyn CacheStorage>)),
      backend: OnceLock::from(Backend::Ready(Box::new(storage))),
      observer: Arc::new(TracingObserver),
    }
  }

  /// Store that never caches anything (caching turned off in config).
  pub fn disabled() -> Self {
    Self::with_backend(NoopStorage)
  }

  pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
    self.observer = observer;
    self
  }

  /// Open the backend if that has not happened yet.
  ///
  /// Returns whether caching is available. Calling it again is cheap and
  /// never retries a failed open.
  pub fn open(&self) -> bool {
    matches!(self.backend(), Some(_))
  }

  fn backend(&self) -> Option<&dyn CacheStorage> {
    let backend = self.backend.get_or_init(|| match (self.opener)() {
      Ok(storage) => Backend::Ready(storage),
      Err(e) => {
        self.observer.on_event(&CacheEvent::Disabled {
          reason: e.to_string(),
        });
        Backend::Disabled
      }
    });

    match backend {
      Backend::Ready(storage) => Some(storage.as_ref()),
      Backend::Disabled => None,
    }
  }

  pub fn get<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Option<CacheEntry<T>> {
    let storage = self.backend()?;

    match storage.get(collection, key) {
      Ok(Some(raw)) => self.decode(collection, raw),
      Ok(None) => None,
      Err(e) => {
        self.observer.on_event(&CacheEvent::ReadFailed {
          collection,
          key: Some(key.to_string()),
          reason: e.to_string(),
        });
        None
      }
    }
  }

  pub fn set<T: Serialize>(&self, collection: Collection, key: &str, data: &T, stored_at: DateTime<Utc>) {
    let Some(storage) = self.backend() else {
      return;
    };

    let Some(raw) = self.encode(collection, key, data, stored_at) else {
      return;
    };

    if let Err(e) = storage.put(collection, &raw) {
      self.observer.on_event(&CacheEvent::WriteFailed {
        collection,
        key: Some(key.to_string()),
        reason: e.to_string(),
      });
    }
  }

  pub fn get_all<T: DeserializeOwned>(&self, collection: Collection) -> Vec<CacheEntry<T>> {
    let Some(storage) = self.backend() else {
      return Vec::new();
    };

    match storage.get_all(collection) {
      Ok(rows) => rows
        .into_iter()
        .filter_map(|raw| self.decode(collection, raw))
        .collect(),
      Err(e) => {
        self.observer.on_event(&CacheEvent::ReadFailed {
          collection,
          key: None,
          reason: e.to_string(),
        });
        Vec::new()
      }
    }
  }

  /// Replace a whole collection with `(key, value)` pairs stamped `stored_at`.
  pub fn replace_all<T: Serialize>(
    &self,
    collection: Collection,
    items: &[(String, &T)],
    stored_at: DateTime<Utc>,
  ) {
    let Some(storage) = self.backend() else {
      return;
    };

    let mut rows = Vec::with_capacity(items.len());
    for (key, data) in items {
      match self.encode(collection, key, *data, stored_at) {
        Some(raw) => rows.push(raw),
        // A partial list would look complete on the next read
        None => return,
      }
    }

    if let Err(e) = storage.replace_all(collection, &rows) {
      self.observer.on_event(&CacheEvent::WriteFailed {
        collection,
        key: None,
        reason: e.to_string(),
      });
    }
  }

  pub fn clear(&self, collection: Collection) {
    let Some(storage) = self.backend() else {
      return;
    };

    if let Err(e) = storage.clear(collection) {
      self.observer.on_event(&CacheEvent::WriteFailed {
        collection,
        key: None,
        reason: e.to_string(),
      });
    }
  }

  fn encode<T: Serialize>(
    &self,
    collection: Collection,
    key: &str,
    data: &T,
    stored_at: DateTime<Utc>,
  ) -> Option<RawEntry> {
    match serde_json::to_vec(data) {
      Ok(bytes) => Some(RawEntry {
        key: key.to_string(),
        data: bytes,
        stored_at,
      }),
      Err(e) => {
        self.observer.on_event(&CacheEvent::WriteFailed {
          collection,
          key: Some(key.to_string()),
          reason: format!("Failed to serialize entry: {}", e),
        });
        None
      }
    }
  }

  fn decode<T: DeserializeOwned>(&self, collection: Collection, raw: RawEntry) -> Option<CacheEntry<T>> {
    match serde_json::from_slice(&raw.data) {
      Ok(data) => Some(CacheEntry {
        data,
        stored_at: raw.stored_at,
      }),
      Err(e) => {
        self.observer.on_event(&CacheEvent::DecodeFailed {
          collection,
          key: raw.key,
          reason: e.to_string(),
        });
        None
      }
    }
  }
}
