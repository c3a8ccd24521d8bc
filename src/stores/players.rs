use color_eyre::Result;

use crate::api::cache::{FEATURED_PLAYERS_KEY, PLAYER_OF_MONTH_KEY};
use crate::api::types::Player;
use crate::api::BefaClient;
use crate::cache::{Collection, TtlCache};
use crate::event::Notifier;
use crate::sync::{CachedResource, Keyed, ResourceState};

pub struct PlayersStore {
  client: BefaClient,
  notifier: Notifier,
  player_of_month: CachedResource<Player>,
  featured: CachedResource<Vec<Player>>,
}

impl PlayersStore {
  pub fn new(client: BefaClient, cache: TtlCache, notifier: Notifier) -> Self {
    Self {
      client,
      notifier,
      player_of_month: CachedResource::new(cache.clone()),
      featured: CachedResource::new(cache),
    }
  }

  pub fn player_of_month(&self) -> &CachedResource<Player> {
    &self.player_of_month
  }

  pub fn featured(&self) -> &CachedResource<Vec<Player>> {
    &self.featured
  }

  pub async fn fetch_player_of_month(&self) -> Result<ResourceState<Player>> {
    let binding = Keyed::new(Collection::Players, PLAYER_OF_MONTH_KEY);
    let client = self.client.clone();
    let result = self
      .player_of_month
      .load(&binding, || async move { client.get_player_of_month().await })
      .await;

    if let Err(e) = result {
      self.notifier.error("Failed to fetch Player of the Month");
      return Err(e);
    }
    Ok(self.player_of_month.snapshot())
  }

  pub async fn fetch_featured_players(&self) -> Result<ResourceState<Vec<Player>>> {
    let binding = Keyed::new(Collection::Players, FEATURED_PLAYERS_KEY);
    let client = self.client.clone();
    let result = self
      .featured
      .load(&binding, || async move { client.get_featured_players().await })
      .await;

    if let Err(e) = result {
      self.notifier.error("Failed to fetch Featured Players");
      return Err(e);
    }
    Ok(self.featured.snapshot())
  }
}
