use color_eyre::Result;
use std::sync::Arc;

use crate::api::{BefaClient, TokenSource};
use crate::cache::{CacheStorage, Collection, DurableStore, SqliteStorage, TtlCache};
use crate::config::Config;
use crate::event::Notifier;
use crate::live::{LiveChannel, WsTransport};
use crate::stores::{FeedStore, PlayersStore, ScheduleStore, ShopStore};

/// Everything a command needs: one cache, one client, the four stores.
pub struct App {
  pub config: Config,
  pub cache: TtlCache,
  pub feed: FeedStore,
  pub players: PlayersStore,
  pub schedule: Arc<ScheduleStore>,
  pub shop: ShopStore,
}

impl App {
  pub fn new(config: Config, tokens: Arc<dyn TokenSource>, notifier: Notifier) -> Result<Self> {
    let client = BefaClient::new(&config.api.base_url, tokens)?;
    let cache = build_cache(&config);

    let mut feed = FeedStore::new(client.clone(), cache.clone(), notifier.clone());
    if config.live.enabled {
      let live = LiveChannel::new(Arc::new(WsTransport), config.channel_config(), notifier.clone());
      feed = feed.with_live(live);
    }

    Ok(Self {
      feed,
      players: PlayersStore::new(client.clone(), cache.clone(), notifier.clone()),
      schedule: Arc::new(ScheduleStore::new(client.clone(), cache.clone())),
      shop: ShopStore::new(client, cache.clone(), notifier),
      cache,
      config,
    })
  }

  /// Drop every cached entry of `collection`. Returns false if there is no
  /// cache to clear.
  pub fn clear_cache(&self, collection: Collection) -> bool {
    if !self.cache.is_available() {
      return false;
    }
    self.cache.clear(collection);
    tracing::info!(collection = %collection, "cache cleared");
    true
  }
}

/// SQLite-backed TTL cache, opened on first use. Any failure to open it
/// leaves the app running without a cache.
fn build_cache(config: &Config) -> TtlCache {
  if !config.cache.enabled {
    tracing::info!("cache disabled by configuration");
    return TtlCache::disabled();
  }

  let config = config.clone();
  TtlCache::new(DurableStore::lazy(move || {
    let path = config.cache_path()?;
    tracing::debug!(path = %path.display(), "opening cache");
    Ok(Box::new(SqliteStorage::open(&path)?) as Box<dyn CacheStorage>)
  }))
}
