//! Cache-first, network-confirmed data loading.
//!
//! A `CachedResource<T>` owns the published state of one piece of data. Its
//! `load` method runs the read protocol:
//!
//! 1. Read the TTL cache through a [`CacheBinding`]; publish a hit right away
//! 2. Always run the live fetch, even after a hit
//! 3. On success publish the live value and write it back to the cache
//! 4. On failure keep whatever is published and set the error flag
//!
//! # Example
//!
//! ```ignore
//! let schedule = CachedResource::new(cache.clone()).with_prepare(sort_by_date);
//! let binding = Keyed::new(Collection::Schedule, "events");
//!
//! let client = client.clone();
//! schedule.load(&binding, || async move { client.get_schedule_events().await }).await?;
//!
//! let mut rx = schedule.subscribe();
//! while rx.changed().await.is_ok() {
//!     render(&rx.borrow());
//! }
//! ```

use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

use crate::cache::{CacheSource, Cacheable, Collection, TtlCache};

/// Published state of a resource.
///
/// Unlike a plain loading/success/error enum, data survives a failed refresh:
/// stale data next to an error is a valid state.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<T> {
  pub data: Option<T>,
  pub loading: bool,
  pub error: Option<String>,
  pub source: Option<CacheSource>,
}

impl<T> Default for ResourceState<T> {
  fn default() -> Self {
    Self {
      data: None,
      loading: false,
      error: None,
      source: None,
    }
  }
}

impl<T> ResourceState<T> {
  pub fn has_data(&self) -> bool {
    self.data.is_some()
  }

  /// Showing old data because the live fetch failed.
  pub fn is_offline(&self) -> bool {
    self.source == Some(CacheSource::Offline)
  }
}

/// Where a resource's value lives in the cache.
pub trait CacheBinding<T>: Send + Sync {
  fn read(&self, cache: &TtlCache) -> Option<T>;
  fn write(&self, cache: &TtlCache, value: &T);
}

/// Whole value stored under one key (e.g. `schedule/events`).
#[derive(Debug, Clone)]
pub struct Keyed {
  collection: Collection,
  key: String,
}

impl Keyed {
  pub fn new(collection: Collection, key: impl Into<String>) -> Self {
    Self {
      collection,
      key: key.into(),
    }
  }
}

impl<T: Serialize + DeserializeOwned> CacheBinding<T> for Keyed {
  fn read(&self, cache: &TtlCache) -> Option<T> {
    cache.get(self.collection, &self.key)
  }

  fn write(&self, cache: &TtlCache, value: &T) {
    cache.set(self.collection, &self.key, value);
  }
}

/// List whose items are stored one row per entity.
///
/// Writing replaces the collection, so server-side deletions and empty
/// results are reflected in the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityList;

impl<T: Cacheable> CacheBinding<Vec<T>> for EntityList {
  fn read(&self, cache: &TtlCache) -> Option<Vec<T>> {
    let items: Vec<T> = cache.get_all(T::collection());
    if items.is_empty() {
      None
    } else {
      Some(items)
    }
  }

  fn write(&self, cache: &TtlCache, value: &Vec<T>) {
    cache.replace_entities(value);
  }
}

/// Live-only data (cart, orders).
#[derive(Debug, Clone, Copy, Default)]
pub struct Uncached;

impl<T> CacheBinding<T> for Uncached {
  fn read(&self, _cache: &TtlCache) -> Option<T> {
    None
  }

  fn write(&self, _cache: &TtlCache, _value: &T) {}
}

/// Published, cache-backed state for one piece of data.
pub struct CachedResource<T> {
  cache: TtlCache,
  state: watch::Sender<ResourceState<T>>,
  generation: AtomicU64,
  prepare: Option<fn(&mut T)>,
}

impl<T: Clone + Send + Sync + 'static> CachedResource<T> {
  pub fn new(cache: TtlCache) -> Self {
    let (state, _) = watch::channel(ResourceState::default());
    Self {
      cache,
      state,
      generation: AtomicU64::new(0),
      prepare: None,
    }
  }

  /// Normalize every value before it is published (e.g. sort by date).
  pub fn with_prepare(mut self, prepare: fn(&mut T)) -> Self {
    self.prepare = Some(prepare);
    self
  }

  pub fn cache(&self) -> &TtlCache {
    &self.cache
  }

  /// Watch published state changes.
  pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
    self.state.subscribe()
  }

  pub fn snapshot(&self) -> ResourceState<T> {
    self.state.borrow().clone()
  }

  pub fn data(&self) -> Option<T> {
    self.state.borrow().data.clone()
  }

  /// Modify the published data in place.
  ///
  /// `f` returns whether it changed anything. Watchers are only notified if
  /// it did, and there is nothing to change while no data is published.
  pub fn update(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
    self
      .state
      .send_if_modified(|state| state.data.as_mut().map(f).unwrap_or(false))
  }

  /// Publish a value that did not come from `load` (e.g. a mutation response).
  pub fn publish(&self, data: T) {
    self.state.send_modify(|state| {
      state.data = Some(data);
      state.error = None;
      state.source = Some(CacheSource::Network);
    });
  }

  /// Write the currently published data to the cache.
  pub fn remember<B: CacheBinding<T>>(&self, binding: &B) {
    if let Some(data) = self.data() {
      binding.write(&self.cache, &data);
    }
  }

  /// Discard the results of loads that are still in flight.
  ///
  /// Call when nobody is interested any more (view closed, selection changed).
  pub fn cancel(&self) {
    self.generation.fetch_add(1, Ordering::SeqCst);
    self.state.send_if_modified(|state| {
      let was_loading = state.loading;
      state.loading = false;
      was_loading
    });
  }

  /// Cancel in-flight loads and forget the published state.
  pub fn reset(&self) {
    self.generation.fetch_add(1, Ordering::SeqCst);
    self.state.send_replace(ResourceState::default());
  }

  /// Run the cache-first, network-confirmed read protocol.
  ///
  /// Returns the live fetch error, if any, after recording it in the state.
  /// A load overtaken by a newer load or by `cancel` leaves the state alone.
  pub async fn load<B, F, Fut>(&self, binding: &B, fetcher: F) -> Result<()>
  where
    B: CacheBinding<T>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

    let cached = binding.read(&self.cache).map(|mut data| {
      self.prepare(&mut data);
      data
    });

    self.state.send_modify(|state| {
      if let Some(data) = cached {
        state.data = Some(data);
        state.source = Some(CacheSource::Cache);
      }
      state.loading = true;
    });

    let result = fetcher().await;

    if self.generation.load(Ordering::SeqCst) != generation {
      if let Err(e) = result {
        tracing::debug!("discarding failure of superseded load: {}", e);
      } else {
        tracing::debug!("discarding result of superseded load");
      }
      return Ok(());
    }

    match result {
      Ok(mut data) => {
        self.prepare(&mut data);
        binding.write(&self.cache, &data);
        self.state.send_modify(|state| {
          state.data = Some(data);
          state.loading = false;
          state.error = None;
          state.source = Some(CacheSource::Network);
        });
        Ok(())
      }
      Err(e) => {
        self.state.send_modify(|state| {
          state.loading = false;
          state.error = Some(e.to_string());
          if state.data.is_some() {
            state.source = Some(CacheSource::Offline);
          }
        });
        Err(e)
      }
    }
  }

  fn prepare(&self, data: &mut T) {
    if let Some(prepare) = self.prepare {
      prepare(data);
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CachedResource<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CachedResource")
      .field("state", &*self.state.borrow())
      .field("generation", &self.generation)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{DurableStore, ManualClock, SqliteStorage};
  use chrono::Duration;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::AtomicU32;
  use std::sync::Arc;

  fn cache() -> (TtlCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let store = DurableStore::with_backend(SqliteStorage::open_in_memory().unwrap());
    (TtlCache::new(store).with_clock(clock.clone()), clock)
  }

  fn binding() -> Keyed {
    Keyed::new(Collection::Players, "featured")
  }

  #[tokio::test]
  async fn test_live_fetch_runs_even_on_fresh_hit() {
    let (cache, _clock) = cache();
    cache.set(Collection::Players, "featured", &vec!["cached".to_string()]);

    let resource = CachedResource::<Vec<String>>::new(cache.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let mut rx = resource.subscribe();
    resource
      .load(&binding(), || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["live".to_string()])
      })
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let state = rx.borrow_and_update().clone();
    assert_eq!(state.data, Some(vec!["live".to_string()]));
    assert_eq!(state.source, Some(CacheSource::Network));
    assert!(!state.loading);
    // Cache refreshed with the live payload
    assert_eq!(
      cache.get::<Vec<String>>(Collection::Players, "featured"),
      Some(vec!["live".to_string()])
    );
  }

  #[tokio::test]
  async fn test_cache_hit_published_before_fetch_completes() {
    let (cache, _clock) = cache();
    cache.set(Collection::Players, "featured", &vec![1u32]);

    let resource = Arc::new(CachedResource::<Vec<u32>>::new(cache));
    let (release, wait) = tokio::sync::oneshot::channel::<()>();

    let loader = resource.clone();
    let task = tokio::spawn(async move {
      loader
        .load(&binding(), || async move {
          let _ = wait.await;
          Ok(vec![2u32])
        })
        .await
    });

    let mut rx = resource.subscribe();
    let state = rx
      .wait_for(|s| s.loading)
      .await
      .unwrap()
      .clone();
    assert_eq!(state.data, Some(vec![1]));
    assert_eq!(state.source, Some(CacheSource::Cache));

    release.send(()).unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(resource.data(), Some(vec![2]));
  }

  #[tokio::test]
  async fn test_failure_keeps_stale_data_and_sets_error() {
    let (cache, _clock) = cache();
    cache.set(Collection::Players, "featured", &vec![7u32]);

    let resource = CachedResource::<Vec<u32>>::new(cache);
    let result = resource
      .load(&binding(), || async { Err(eyre!("Failed to fetch Featured Players")) })
      .await;

    assert!(result.is_err());
    let state = resource.snapshot();
    assert_eq!(state.data, Some(vec![7]));
    assert!(state.is_offline());
    assert_eq!(state.error.as_deref(), Some("Failed to fetch Featured Players"));
  }

  #[tokio::test]
  async fn test_failure_without_cache_has_no_data() {
    let (cache, _clock) = cache();
    let resource = CachedResource::<Vec<u32>>::new(cache);

    let _ = resource.load(&binding(), || async { Err(eyre!("offline")) }).await;

    let state = resource.snapshot();
    assert!(!state.has_data());
    assert!(state.error.is_some());
    assert_eq!(state.source, None);
  }

  #[tokio::test]
  async fn test_expired_cache_not_published() {
    let (cache, clock) = cache();
    cache.set(Collection::Players, "featured", &vec![1u32]);
    clock.advance(Duration::minutes(6));

    let resource = CachedResource::<Vec<u32>>::new(cache);
    let _ = resource.load(&binding(), || async { Err(eyre!("offline")) }).await;
    assert_eq!(resource.data(), None);
  }

  #[tokio::test]
  async fn test_empty_live_list_replaces_cached_list() {
    let (cache, _clock) = cache();
    cache.set(Collection::Players, "featured", &vec![1u32, 2]);

    let resource = CachedResource::<Vec<u32>>::new(cache.clone());
    resource.load(&binding(), || async { Ok(Vec::new()) }).await.unwrap();

    assert_eq!(resource.data(), Some(Vec::new()));
    assert_eq!(cache.get::<Vec<u32>>(Collection::Players, "featured"), Some(Vec::new()));
  }

  #[tokio::test]
  async fn test_cancel_discards_in_flight_result() {
    let (cache, _clock) = cache();
    let resource = Arc::new(CachedResource::<u32>::new(cache.clone()));
    let (release, wait) = tokio::sync::oneshot::channel::<()>();

    let loader = resource.clone();
    let task = tokio::spawn(async move {
      loader
        .load(&binding(), || async move {
          let _ = wait.await;
          Ok(5u32)
        })
        .await
    });

    resource.subscribe().wait_for(|s| s.loading).await.unwrap();
    resource.cancel();
    release.send(()).unwrap();
    task.await.unwrap().unwrap();

    let state = resource.snapshot();
    assert_eq!(state.data, None);
    assert!(!state.loading);
    assert_eq!(cache.get::<u32>(Collection::Players, "featured"), None);
  }

  #[tokio::test]
  async fn test_prepare_applies_to_cached_and_live() {
    let (cache, _clock) = cache();
    cache.set(Collection::Schedule, "events", &vec![3, 1, 2]);

    let resource = CachedResource::<Vec<i32>>::new(cache).with_prepare(|v| v.sort());
    let binding = Keyed::new(Collection::Schedule, "events");
    let mut rx = resource.subscribe();

    let result = resource
      .load(&binding, || async { Err(eyre!("offline")) })
      .await;
    assert!(result.is_err());
    assert_eq!(rx.borrow_and_update().data, Some(vec![1, 2, 3]));

    resource.load(&binding, || async { Ok(vec![9, 4]) }).await.unwrap();
    assert_eq!(resource.data(), Some(vec![4, 9]));
  }

  #[tokio::test]
  async fn test_update_only_touches_existing_data() {
    let (cache, _clock) = cache();
    let resource = CachedResource::<u32>::new(cache);

    assert!(!resource.update(|n| {
      *n += 1;
      true
    }));
    resource.publish(1);
    assert!(resource.update(|n| {
      *n += 1;
      true
    }));
    assert_eq!(resource.data(), Some(2));
  }

  #[tokio::test]
  async fn test_update_that_changes_nothing_does_not_notify() {
    let (cache, _clock) = cache();
    let resource = CachedResource::<Vec<u32>>::new(cache);
    resource.publish(vec![1, 2]);

    let mut rx = resource.subscribe();
    rx.borrow_and_update();

    let changed = resource.update(|items| match items.iter_mut().find(|n| **n == 9) {
      Some(n) => {
        *n = 10;
        true
      }
      None => false,
    });
    assert!(!changed);
    assert!(!rx.has_changed().unwrap());
  }

  #[tokio::test]
  async fn test_superseded_failure_is_not_an_error() {
    let (cache, _clock) = cache();
    let resource = Arc::new(CachedResource::<u32>::new(cache));
    let (release, wait) = tokio::sync::oneshot::channel::<()>();

    let loader = resource.clone();
    let task = tokio::spawn(async move {
      loader
        .load(&binding(), || async move {
          let _ = wait.await;
          Err(eyre!("offline"))
        })
        .await
    });

    resource.subscribe().wait_for(|s| s.loading).await.unwrap();
    resource.load(&binding(), || async { Ok(3u32) }).await.unwrap();
    release.send(()).unwrap();

    assert!(task.await.unwrap().is_ok());
    let state = resource.snapshot();
    assert_eq!(state.data, Some(3));
    assert_eq!(state.error, None);
  }
}
