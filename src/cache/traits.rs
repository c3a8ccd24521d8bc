//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Report};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named partition of the cache. Each data domain owns one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Posts,
  Players,
  Schedule,
  Products,
}

impl Collection {
  pub const ALL: [Collection; 4] = [
    Collection::Posts,
    Collection::Players,
    Collection::Schedule,
    Collection::Products,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Collection::Posts => "posts",
      Collection::Players => "players",
      Collection::Schedule => "schedule",
      Collection::Products => "products",
    }
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Collection {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Collection::ALL
      .into_iter()
      .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| eyre!("Unknown cache collection '{}' (expected posts, players, schedule or products)", s))
  }
}

/// Trait for entities that are cached one row per entity.
///
/// Implementors provide the key they are stored under inside their collection.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique key within the collection (e.g. `post_12`)
  fn cache_key(&self) -> String;

  /// Collection the entity lives in
  fn collection() -> Collection;
}

/// A cached value together with the moment it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
  pub data: T,
  pub stored_at: DateTime<Utc>,
}

/// Indicates where published data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, network confirmation still pending
  Cache,
  /// Network failed, still showing the last known data
  Offline,
}

/// Something the cache swallowed instead of surfacing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  /// The backend could not be opened; caching is off for this session
  Disabled { reason: String },
  ReadFailed { collection: Collection, key: Option<String>, reason: String },
  WriteFailed { collection: Collection, key: Option<String>, reason: String },
  /// A stored row could not be decoded into the requested type
  DecodeFailed { collection: Collection, key: String, reason: String },
}

/// Hook that receives every failure the cache recovers from locally.
pub trait CacheObserver: Send + Sync {
  fn on_event(&self, event: &CacheEvent);
}

/// Default observer: log through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CacheObserver for TracingObserver {
  fn on_event(&self, event: &CacheEvent) {
    match event {
      CacheEvent::Disabled { reason } => {
        tracing::warn!(%reason, "cache unavailable, continuing without it")
      }
      CacheEvent::ReadFailed { collection, key, reason } => {
        tracing::warn!(%collection, ?key, %reason, "cache read failed")
      }
      CacheEvent::WriteFailed { collection, key, reason } => {
        tracing::warn!(%collection, ?key, %reason, "cache write failed")
      }
      CacheEvent::DecodeFailed { collection, key, reason } => {
        tracing::debug!(%collection, %key, %reason, "discarding undecodable cache entry")
      }
    }
  }
}
