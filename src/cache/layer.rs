//! TTL policy on top of the durable store.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::durable::DurableStore;
use super::traits::{CacheEntry, Cacheable, Collection};

/// How long a write stays readable, in seconds.
pub const DEFAULT_TTL_SECS: i64 = 5 * 60;

/// Cache client handed to every store.
///
/// Reads never return an entry older than the TTL. Expired rows are left in
/// place until the next write of the same key or a `clear`.
#[derive(Clone)]
pub struct TtlCache {
  store: Arc<DurableStore>,
  clock: Arc<dyn Clock>,
  ttl: Duration,
}

impl TtlCache {
  pub fn new(store: DurableStore) -> Self {
    Self {
      store: Arc::new(store),
      clock: Arc::new(SystemClock),
      ttl: Duration::seconds(DEFAULT_TTL_SECS),
    }
  }

  /// Replace the time source (tests fast-forward a manual clock).
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Cache that stores nothing and always misses.
  pub fn disabled() -> Self {
    Self::new(DurableStore::disabled())
  }

  /// Whether caching is actually available (opens the backend if needed).
  pub fn is_available(&self) -> bool {
    self.store.open()
  }

  /// An entry is fresh iff `now - stored_at < ttl`.
  pub fn is_fresh(&self, stored_at: DateTime<Utc>) -> bool {
    self.clock.now() - stored_at < self.ttl
  }

  /// Fresh value for `key`, or `None` if missing or expired.
  pub fn get<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Option<T> {
    self.get_entry(collection, key).map(|entry| entry.data)
  }

  pub fn get_entry<T: DeserializeOwned>(
    &self,
    collection: Collection,
    key: &str,
  ) -> Option<CacheEntry<T>> {
    self
      .store
      .get(collection, key)
      .filter(|entry| self.is_fresh(entry.stored_at))
  }

  /// Store `value` under `key`, stamped now. Replaces any previous entry.
  pub fn set<T: Serialize>(&self, collection: Collection, key: &str, value: &T) {
    self.store.set(collection, key, value, self.clock.now());
  }

  /// Every fresh value in a collection, unordered.
  pub fn get_all<T: DeserializeOwned>(&self, collection: Collection) -> Vec<T> {
    self
      .store
      .get_all(collection)
      .into_iter()
      .filter(|entry| self.is_fresh(entry.stored_at))
      .map(|entry| entry.data)
      .collect()
  }

  /// Store a single entity under its own key.
  pub fn put_entity<T: Cacheable>(&self, entity: &T) {
    self.set(T::collection(), &entity.cache_key(), entity);
  }

  /// Make the entity collection hold exactly `entities`.
  ///
  /// An empty slice empties the collection.
  pub fn replace_entities<T: Cacheable>(&self, entities: &[T]) {
    let items: Vec<(String, &T)> = entities.iter().map(|e| (e.cache_key(), e)).collect();
    self
      .store
      .replace_all(T::collection(), &items, self.clock.now());
  }

  pub fn clear(&self, collection: Collection) {
    self.store.clear(collection);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use crate::cache::storage::SqliteStorage;
  use serde::Deserialize;

  fn cache_with_clock() -> (TtlCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let store = DurableStore::with_backend(SqliteStorage::open_in_memory().unwrap());
    let cache = TtlCache::new(store).with_clock(clock.clone());
    (cache, clock)
  }

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Item {
    id: u64,
    name: String,
  }

  impl Cacheable for Item {
    fn cache_key(&self) -> String {
      format!("product_{}", self.id)
    }

    fn collection() -> Collection {
      Collection::Products
    }
  }

  fn item(id: u64, name: &str) -> Item {
    Item {
      id,
      name: name.to_string(),
    }
  }

  #[test]
  fn test_entry_expires_after_ttl() {
    let (cache, clock) = cache_with_clock();

    cache.set(Collection::Schedule, "events", &vec![1, 2, 3]);

    clock.advance(Duration::seconds(299));
    assert_eq!(cache.get::<Vec<i32>>(Collection::Schedule, "events"), Some(vec![1, 2, 3]));

    // Exactly at the TTL the entry is no longer fresh
    clock.advance(Duration::seconds(1));
    assert_eq!(cache.get::<Vec<i32>>(Collection::Schedule, "events"), None);
  }

  #[test]
  fn test_expired_entry_stays_on_disk() {
    let clock = Arc::new(ManualClock::at_epoch());
    let store = Arc::new(DurableStore::with_backend(SqliteStorage::open_in_memory().unwrap()));
    let cache = TtlCache {
      store: store.clone(),
      clock: clock.clone(),
      ttl: Duration::seconds(DEFAULT_TTL_SECS),
    };

    cache.set(Collection::Players, "featured", &"old");
    clock.advance(Duration::minutes(10));

    assert_eq!(cache.get::<String>(Collection::Players, "featured"), None);
    // Lazy expiry: the row is still physically present
    assert!(store.get::<String>(Collection::Players, "featured").is_some());
  }

  #[test]
  fn test_write_replaces_never_merges() {
    let (cache, clock) = cache_with_clock();

    cache.set(Collection::Players, "player_of_month", &serde_json::json!({"a": 1, "b": 2}));
    clock.advance(Duration::seconds(10));
    cache.set(Collection::Players, "player_of_month", &serde_json::json!({"c": 3}));

    let entry = cache
      .get_entry::<serde_json::Value>(Collection::Players, "player_of_month")
      .unwrap();
    assert_eq!(entry.data, serde_json::json!({"c": 3}));
    assert_eq!(entry.stored_at, clock.now());
  }

  #[test]
  fn test_get_all_filters_expired() {
    let (cache, clock) = cache_with_clock();

    cache.put_entity(&item(1, "old"));
    clock.advance(Duration::minutes(4));
    cache.put_entity(&item(2, "new"));
    clock.advance(Duration::minutes(2));

    let items: Vec<Item> = cache.get_all(Collection::Products);
    assert_eq!(items, vec![item(2, "new")]);
  }

  #[test]
  fn test_replace_entities_drops_missing_and_empty_clears() {
    let (cache, _clock) = cache_with_clock();

    cache.replace_entities(&[item(1, "a"), item(2, "b")]);
    cache.replace_entities(&[item(2, "b2")]);

    let items: Vec<Item> = cache.get_all(Collection::Products);
    assert_eq!(items, vec![item(2, "b2")]);

    cache.replace_entities::<Item>(&[]);
    assert!(cache.get_all::<Item>(Collection::Products).is_empty());
  }

  #[test]
  fn test_disabled_cache_misses() {
    let cache = TtlCache::disabled();
    cache.set(Collection::Posts, "post_1", &1);
    assert_eq!(cache.get::<i32>(Collection::Posts, "post_1"), None);
    assert!(cache.get_all::<i32>(Collection::Posts).is_empty());
    cache.clear(Collection::Posts);
  }
}
