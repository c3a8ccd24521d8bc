//! API paths, relative to the configured base URL.

pub mod content_hub {
  pub fn posts() -> String {
    "content-hub/posts/".to_string()
  }

  pub fn post_detail(id: u64) -> String {
    format!("content-hub/posts/{}/", id)
  }

  pub fn like_post(id: u64) -> String {
    format!("content-hub/posts/{}/like/", id)
  }

  pub fn share_post(id: u64) -> String {
    format!("content-hub/posts/{}/share/", id)
  }

  pub fn comments() -> String {
    "content-hub/comments/".to_string()
  }

  pub fn like_comment(id: u64) -> String {
    format!("content-hub/comments/{}/like/", id)
  }
}

pub mod players {
  pub fn player_of_month() -> String {
    "players/player-of-the-month/".to_string()
  }

  pub fn featured() -> String {
    "players/featured-players/".to_string()
  }
}

pub mod schedule {
  pub fn events() -> String {
    "schedule/events/".to_string()
  }
}

pub mod ecommerce {
  pub fn products() -> String {
    "ecommerce/products/".to_string()
  }

  pub fn product_detail(id: u64) -> String {
    format!("ecommerce/products/{}/", id)
  }

  pub fn cart() -> String {
    "ecommerce/cart/".to_string()
  }

  pub fn add_to_cart() -> String {
    "ecommerce/cart/add/".to_string()
  }

  /// PATCH to change quantity, DELETE to remove
  pub fn cart_item(id: u64) -> String {
    format!("ecommerce/cart/{}/", id)
  }

  pub fn clear_cart() -> String {
    "ecommerce/cart/clear/".to_string()
  }

  pub fn orders() -> String {
    "ecommerce/orders/".to_string()
  }

  pub fn my_orders() -> String {
    "ecommerce/my-orders/".to_string()
  }
}

/// Live comment socket for one post, relative to the WebSocket base URL.
pub fn post_socket(post_id: u64) -> String {
  format!("ws/posts/{}/", post_id)
}
