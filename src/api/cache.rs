//! Caching implementations for BEFA types.

use crate::cache::{Cacheable, Collection};

use super::types::{Post, Product};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Post {
  fn cache_key(&self) -> String {
    post_key(self.id)
  }

  fn collection() -> Collection {
    Collection::Posts
  }
}

impl Cacheable for Product {
  fn cache_key(&self) -> String {
    product_key(self.id)
  }

  fn collection() -> Collection {
    Collection::Products
  }
}

// ============================================================================
// Keys
// ============================================================================

pub fn post_key(id: u64) -> String {
  format!("post_{}", id)
}

pub fn product_key(id: u64) -> String {
  format!("product_{}", id)
}

/// Singleton keys for collections that hold one logical value per key.
pub const PLAYER_OF_MONTH_KEY: &str = "player_of_month";
pub const FEATURED_PLAYERS_KEY: &str = "featured";
pub const SCHEDULE_EVENTS_KEY: &str = "events";
