//! Domain stores. Each one owns the published state for a screen's data and
//! the write actions on it.

pub mod feed;
pub mod players;
pub mod schedule;
pub mod shop;

pub use feed::FeedStore;
pub use players::PlayersStore;
pub use schedule::ScheduleStore;
pub use shop::ShopStore;

#[cfg(test)]
pub(crate) mod testing {
  use std::sync::Arc;
  use wiremock::MockServer;

  use crate::api::{BefaClient, StaticToken};
  use crate::cache::{DurableStore, ManualClock, SqliteStorage, TtlCache};

  /// In-memory cache on a clock that starts at the epoch.
  pub fn cache() -> (TtlCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let store = DurableStore::with_backend(SqliteStorage::open_in_memory().unwrap());
    let cache = TtlCache::new(store).with_clock(clock.clone());
    (cache, clock)
  }

  pub fn client(server: &MockServer, token: Option<&str>) -> BefaClient {
    let tokens = Arc::new(StaticToken::new(token.map(String::from)));
    BefaClient::new(&format!("{}/api/", server.uri()), tokens).unwrap()
  }
}
