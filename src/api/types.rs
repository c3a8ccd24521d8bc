use serde::{Deserialize, Serialize};

/// Author of a post or comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub username: String,
}

/// Comment on a feed post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
  pub id: u64,
  /// Id of the post this comment belongs to
  pub post: u64,
  pub author: User,
  pub text: String,
  #[serde(default)]
  pub created_at: String,
  #[serde(default)]
  pub like_count: u64,
  #[serde(default)]
  pub is_liked: bool,
}

/// Feed post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
  pub id: u64,
  pub author: User,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub image_url: String,
  #[serde(default)]
  pub created_at: String,
  #[serde(default)]
  pub updated_at: String,
  #[serde(default)]
  pub like_count: u64,
  #[serde(default)]
  pub is_liked: bool,
  #[serde(default)]
  pub share_count: u64,
  #[serde(default)]
  pub comments: Vec<Comment>,
  #[serde(default)]
  pub comment_count: u64,
}

impl Post {
  /// Take the server's counters and text, keep locally held comments if the
  /// server left them out.
  pub fn reconcile_with(&mut self, server: &Post) {
    let comments = if server.comments.is_empty() && server.comment_count > 0 {
      std::mem::take(&mut self.comments)
    } else {
      server.comments.clone()
    };
    *self = Post {
      comments,
      ..server.clone()
    };
  }

  /// Append a comment that belongs to this post, once. Returns whether it was added.
  pub fn push_comment(&mut self, comment: Comment) -> bool {
    if comment.post != self.id || self.comments.iter().any(|c| c.id == comment.id) {
      return false;
    }
    self.comments.push(comment);
    self.comment_count += 1;
    true
  }
}

/// Player profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub position: String,
  #[serde(default)]
  pub team: String,
  #[serde(default)]
  pub image: String,
  #[serde(default)]
  pub goals: u32,
  #[serde(default)]
  pub assists: u32,
  #[serde(default)]
  pub matches: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rating: Option<f32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub saves: Option<u32>,
  #[serde(default, rename = "cleanSheets", alias = "clean_sheets", skip_serializing_if = "Option::is_none")]
  pub clean_sheets: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bio: Option<String>,
  #[serde(default)]
  pub achievements: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_player_of_the_month: Option<bool>,
}

/// Training session on the schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
  pub id: u64,
  /// `YYYY-MM-DD`
  pub date: String,
  /// `HH:MM` or `HH:MM:SS`
  #[serde(default)]
  pub time: String,
  #[serde(default)]
  pub venue: String,
  #[serde(default)]
  pub jersey_color: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image_url: Option<String>,
  #[serde(default)]
  pub created_at: String,
}

/// Store product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub description: String,
  /// Decimal string as sent by the API (e.g. "25.00")
  pub price: String,
  #[serde(default)]
  pub image_url: String,
  #[serde(default)]
  pub size: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub in_stock: Option<bool>,
}

/// Line in the shopping cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
  /// Server id. Zero while an optimistic add is unconfirmed.
  pub id: u64,
  pub product: Product,
  pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
  pub product: u64,
  pub quantity: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub product_details: Option<Product>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
  pub id: u64,
  pub total_amount: String,
  pub status: String,
  #[serde(default)]
  pub created_at: String,
  #[serde(default)]
  pub items: Vec<OrderItem>,
}

/// Response of the like/share endpoints for posts
#[derive(Debug, Clone, Deserialize)]
pub struct PostActionResponse {
  #[serde(default)]
  pub message: Option<String>,
  pub post: Post,
}

/// Response of the like endpoint for comments
#[derive(Debug, Clone, Deserialize)]
pub struct CommentActionResponse {
  #[serde(default)]
  pub message: Option<String>,
  pub comment: Comment,
}

/// Response of order creation
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutResponse {
  #[serde(default)]
  pub whatsapp_url: Option<String>,
  #[serde(default)]
  pub order: Option<Order>,
}

/// Anything with a like toggle and counter.
pub trait Likeable {
  fn is_liked(&self) -> bool;
  fn set_liked(&mut self, liked: bool);
  fn like_count(&self) -> u64;
  fn set_like_count(&mut self, count: u64);
}

impl Likeable for Post {
  fn is_liked(&self) -> bool {
    self.is_liked
  }
  fn set_liked(&mut self, liked: bool) {
    self.is_liked = liked;
  }
  fn like_count(&self) -> u64 {
    self.like_count
  }
  fn set_like_count(&mut self, count: u64) {
    self.like_count = count;
  }
}

impl Likeable for Comment {
  fn is_liked(&self) -> bool {
    self.is_liked
  }
  fn set_liked(&mut self, liked: bool) {
    self.is_liked = liked;
  }
  fn like_count(&self) -> u64 {
    self.like_count
  }
  fn set_like_count(&mut self, count: u64) {
    self.like_count = count;
  }
}
