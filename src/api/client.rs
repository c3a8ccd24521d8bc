use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::api::endpoints::{content_hub, ecommerce, players, schedule};
use crate::api::types::{
  CartItem, CheckoutResponse, Comment, CommentActionResponse, Order, Player, Post,
  PostActionResponse, Product, ScheduleEvent,
};

/// Supplies the current bearer token. Issuing and refreshing tokens happens elsewhere.
pub trait TokenSource: Send + Sync {
  fn token(&self) -> Option<String>;
}

/// Token fixed for the life of the process, e.g. read from the environment.
#[derive(Debug, Default)]
pub struct StaticToken {
  token: Option<String>,
}

impl StaticToken {
  pub fn new(token: Option<String>) -> Self {
    Self {
      token: token.filter(|t| !t.trim().is_empty()),
    }
  }
}

impl TokenSource for StaticToken {
  fn token(&self) -> Option<String> {
    self.token.clone()
  }
}

#[derive(Deserialize)]
struct ErrorBody {
  detail: Option<String>,
}

/// BEFA REST API client
#[derive(Clone)]
pub struct BefaClient {
  http: reqwest::Client,
  base_url: String,
  tokens: Arc<dyn TokenSource>,
}

impl BefaClient {
  pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> Result<Self> {
    url::Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL '{}': {}", base_url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("befa/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
      tokens,
    })
  }

  /// Current bearer token, if the user is logged in.
  pub fn token(&self) -> Option<String> {
    self.tokens.token()
  }

  fn request(&self, method: Method, path: &str) -> RequestBuilder {
    let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
    let builder = self.http.request(method, url);
    match self.tokens.token() {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn send(&self, builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", what, e))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&body)
      .ok()
      .and_then(|b| b.detail)
      .unwrap_or_else(|| status.to_string());

    Err(eyre!("Failed to {}: {}", what, detail))
  }

  async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
    self
      .send(builder, what)
      .await?
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to {}: unexpected response: {}", what, e))
  }

  // ==========================================================================
  // Content hub
  // ==========================================================================

  pub async fn get_posts(&self) -> Result<Vec<Post>> {
    let req = self.request(Method::GET, &content_hub::posts());
    self.send_json(req, "fetch posts").await
  }

  pub async fn get_post(&self, id: u64) -> Result<Post> {
    let req = self.request(Method::GET, &content_hub::post_detail(id));
    self.send_json(req, "fetch post").await
  }

  pub async fn like_post(&self, id: u64) -> Result<PostActionResponse> {
    let req = self.request(Method::POST, &content_hub::like_post(id));
    self.send_json(req, "like post").await
  }

  pub async fn share_post(&self, id: u64) -> Result<PostActionResponse> {
    let req = self.request(Method::POST, &content_hub::share_post(id));
    self.send_json(req, "share post").await
  }

  pub async fn add_comment(&self, post_id: u64, text: &str) -> Result<Comment> {
    let req = self
      .request(Method::POST, &content_hub::comments())
      .json(&json!({ "post": post_id, "text": text }));
    self.send_json(req, "add comment").await
  }

  pub async fn like_comment(&self, id: u64) -> Result<CommentActionResponse> {
    let req = self.request(Method::POST, &content_hub::like_comment(id));
    self.send_json(req, "like comment").await
  }

  // ==========================================================================
  // Players and schedule
  // ==========================================================================

  pub async fn get_player_of_month(&self) -> Result<Player> {
    let req = self.request(Method::GET, &players::player_of_month());
    self.send_json(req, "fetch Player of the Month").await
  }

  pub async fn get_featured_players(&self) -> Result<Vec<Player>> {
    let req = self.request(Method::GET, &players::featured());
    self.send_json(req, "fetch Featured Players").await
  }

  pub async fn get_schedule_events(&self) -> Result<Vec<ScheduleEvent>> {
    let req = self.request(Method::GET, &schedule::events());
    self.send_json(req, "fetch training schedule").await
  }

  // ==========================================================================
  // E-commerce
  // ==========================================================================

  pub async fn get_products(&self) -> Result<Vec<Product>> {
    let req = self.request(Method::GET, &ecommerce::products());
    self.send_json(req, "load products").await
  }

  pub async fn get_product(&self, id: u64) -> Result<Product> {
    let req = self.request(Method::GET, &ecommerce::product_detail(id));
    self.send_json(req, "load product details").await
  }

  pub async fn get_cart(&self) -> Result<Vec<CartItem>> {
    let req = self.request(Method::GET, &ecommerce::cart());
    self.send_json(req, "load cart").await
  }

  pub async fn add_to_cart(&self, product_id: u64) -> Result<()> {
    let req = self
      .request(Method::POST, &ecommerce::add_to_cart())
      .json(&json!({ "product_id": product_id }));
    self.send(req, "add to cart").await?;
    Ok(())
  }

  pub async fn update_cart_item(&self, item_id: u64, quantity: u32) -> Result<()> {
    let req = self
      .request(Method::PATCH, &ecommerce::cart_item(item_id))
      .json(&json!({ "quantity": quantity }));
    self.send(req, "update cart").await?;
    Ok(())
  }

  pub async fn remove_cart_item(&self, item_id: u64) -> Result<()> {
    let req = self.request(Method::DELETE, &ecommerce::cart_item(item_id));
    self.send(req, "remove from cart").await?;
    Ok(())
  }

  pub async fn clear_cart(&self) -> Result<()> {
    let req = self.request(Method::DELETE, &ecommerce::clear_cart());
    self.send(req, "clear cart").await?;
    Ok(())
  }

  pub async fn create_order(&self, product_ids: &[u64]) -> Result<CheckoutResponse> {
    let req = self
      .request(Method::POST, &ecommerce::orders())
      .json(&json!({ "product_ids": product_ids }));
    self.send_json(req, "process checkout").await
  }

  pub async fn get_my_orders(&self) -> Result<Vec<Order>> {
    let req = self.request(Method::GET, &ecommerce::my_orders());
    self.send_json(req, "load orders").await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{body_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client(server: &MockServer, token: Option<&str>) -> BefaClient {
    let tokens = Arc::new(StaticToken::new(token.map(String::from)));
    BefaClient::new(&format!("{}/api/", server.uri()), tokens).unwrap()
  }

  #[tokio::test]
  async fn test_get_posts_sends_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/api/content-hub/posts/"))
      .and(header("authorization", "Bearer abc"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {"id": 1, "author": {"id": 2, "username": "coach"}, "description": "Training today"}
      ])))
      .expect(1)
      .mount(&server)
      .await;

    let posts = client(&server, Some("abc")).get_posts().await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].description, "Training today");
  }

  #[tokio::test]
  async fn test_error_detail_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/api/ecommerce/cart/add/"))
      .and(body_json(json!({"product_id": 7})))
      .respond_with(ResponseTemplate::new(400).set_body_json(json!({"detail": "Out of stock"})))
      .mount(&server)
      .await;

    let err = client(&server, None).add_to_cart(7).await.unwrap_err();
    assert!(err.to_string().contains("Out of stock"), "{}", err);
  }

  #[tokio::test]
  async fn test_error_without_detail_uses_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/api/schedule/events/"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let err = client(&server, None).get_schedule_events().await.unwrap_err();
    assert!(err.to_string().contains("503"), "{}", err);
  }

  #[test]
  fn test_invalid_base_url_rejected() {
    let tokens = Arc::new(StaticToken::default());
    assert!(BefaClient::new("not a url", tokens).is_err());
  }

  #[test]
  fn test_blank_token_is_no_token() {
    assert_eq!(StaticToken::new(Some("  ".into())).token(), None);
  }
}
