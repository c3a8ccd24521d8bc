use color_eyre::{eyre::eyre, Result};

use crate::api::cache::product_key;
use crate::api::types::{CartItem, Order, Product};
use crate::api::BefaClient;
use crate::cache::{Collection, TtlCache};
use crate::event::Notifier;
use crate::sync::{CachedResource, EntityList, Keyed, Mutation, ResourceState, Sequencer, Uncached};

type Cart = Vec<CartItem>;

/// Every cart mutation shares one lane: they all touch the same list.
const CART_KEY: &str = "cart";

/// One more of `product`, as a new line if it isn't in the cart yet.
pub struct AddItem {
  pub product: Product,
}

impl Mutation<Cart> for AddItem {
  fn apply(&self, cart: &mut Cart) {
    match cart.iter_mut().find(|item| item.product.id == self.product.id) {
      Some(item) => item.quantity += 1,
      None => cart.push(CartItem {
        id: 0,
        product: self.product.clone(),
        quantity: 1,
      }),
    }
  }

  fn revert(&self, cart: &mut Cart) {
    let Some(pos) = cart.iter().position(|item| item.product.id == self.product.id) else {
      return;
    };
    if cart[pos].quantity > 1 {
      cart[pos].quantity -= 1;
    } else {
      cart.remove(pos);
    }
  }
}

pub struct SetQuantity {
  pub item_id: u64,
  pub from: u32,
  pub to: u32,
}

impl SetQuantity {
  fn set(cart: &mut Cart, item_id: u64, quantity: u32) {
    if let Some(item) = cart.iter_mut().find(|item| item.id == item_id) {
      item.quantity = quantity;
    }
  }
}

impl Mutation<Cart> for SetQuantity {
  fn apply(&self, cart: &mut Cart) {
    Self::set(cart, self.item_id, self.to);
  }

  fn revert(&self, cart: &mut Cart) {
    Self::set(cart, self.item_id, self.from);
  }
}

/// Drop a line, remembering where it was.
pub struct RemoveItem {
  pub item_id: u64,
  removed: Option<(usize, CartItem)>,
}

impl RemoveItem {
  pub fn new(cart: &[CartItem], item_id: u64) -> Self {
    let removed = cart
      .iter()
      .position(|item| item.id == item_id)
      .map(|pos| (pos, cart[pos].clone()));
    Self { item_id, removed }
  }
}

impl Mutation<Cart> for RemoveItem {
  fn apply(&self, cart: &mut Cart) {
    cart.retain(|item| item.id != self.item_id);
  }

  fn revert(&self, cart: &mut Cart) {
    if let Some((pos, item)) = &self.removed {
      if !cart.iter().any(|i| i.id == item.id) {
        cart.insert((*pos).min(cart.len()), item.clone());
      }
    }
  }
}

pub struct ClearCart {
  previous: Cart,
}

impl ClearCart {
  pub fn new(cart: &[CartItem]) -> Self {
    Self {
      previous: cart.to_vec(),
    }
  }
}

impl Mutation<Cart> for ClearCart {
  fn apply(&self, cart: &mut Cart) {
    cart.clear();
  }

  fn revert(&self, cart: &mut Cart) {
    *cart = self.previous.clone();
  }
}

fn by_id(products: &mut Vec<Product>) {
  products.sort_by_key(|p| p.id);
}

/// Store: catalogue, cart and order history.
///
/// Products are cached; the cart and orders are always read live.
pub struct ShopStore {
  client: BefaClient,
  notifier: Notifier,
  products: CachedResource<Vec<Product>>,
  product: CachedResource<Product>,
  cart: CachedResource<Cart>,
  orders: CachedResource<Vec<Order>>,
  sequencer: Sequencer,
}

impl ShopStore {
  pub fn new(client: BefaClient, cache: TtlCache, notifier: Notifier) -> Self {
    Self {
      client,
      notifier,
      products: CachedResource::new(cache.clone()).with_prepare(by_id),
      product: CachedResource::new(cache.clone()),
      cart: CachedResource::new(cache.clone()),
      orders: CachedResource::new(cache),
      sequencer: Sequencer::new(),
    }
  }

  pub fn products(&self) -> &CachedResource<Vec<Product>> {
    &self.products
  }

  pub fn product(&self) -> &CachedResource<Product> {
    &self.product
  }

  pub fn cart(&self) -> &CachedResource<Cart> {
    &self.cart
  }

  pub fn orders(&self) -> &CachedResource<Vec<Order>> {
    &self.orders
  }

  pub async fn fetch_products(&self) -> Result<ResourceState<Vec<Product>>> {
    let client = self.client.clone();
    if let Err(e) = self.products.load(&EntityList, || async move { client.get_products().await }).await {
      self.notifier.error("Failed to load products");
      return Err(e);
    }
    Ok(self.products.snapshot())
  }

  pub async fn view_product(&self, id: u64) -> Result<ResourceState<Product>> {
    let binding = Keyed::new(Collection::Products, product_key(id));
    let client = self.client.clone();
    if let Err(e) = self.product.load(&binding, || async move { client.get_product(id).await }).await {
      self.notifier.error("Failed to load product details");
      return Err(e);
    }
    Ok(self.product.snapshot())
  }

  pub async fn fetch_cart(&self) -> Result<ResourceState<Cart>> {
    let client = self.client.clone();
    if let Err(e) = self.cart.load(&Uncached, || async move { client.get_cart().await }).await {
      self.notifier.error("Failed to load cart");
      return Err(e);
    }
    Ok(self.cart.snapshot())
  }

  pub async fn fetch_orders(&self) -> Result<ResourceState<Vec<Order>>> {
    let client = self.client.clone();
    if let Err(e) = self.orders.load(&Uncached, || async move { client.get_my_orders().await }).await {
      self.notifier.error("Failed to load orders");
      return Err(e);
    }
    Ok(self.orders.snapshot())
  }

  fn known_product(&self, id: u64) -> Option<Product> {
    self
      .products
      .data()
      .and_then(|products| products.into_iter().find(|p| p.id == id))
      .or_else(|| self.product.data().filter(|p| p.id == id))
  }

  /// Apply `mutation` to the cart, send `request`, then take the server's
  /// cart as the truth.
  async fn mutate_cart<M, Fut>(&self, mutation: &M, request: Fut, success: &str) -> Result<Cart>
  where
    M: Mutation<Cart>,
    Fut: std::future::Future<Output = Result<()>>,
  {
    let slot = |f: &mut dyn FnMut(&mut Cart)| {
      self.cart.update(|cart| {
        f(cart);
        true
      })
    };
    let client = self.client.clone();
    let request = async move {
      request.await?;
      client.get_cart().await
    };

    let result = self
      .sequencer
      .run(CART_KEY, &slot, mutation, request, |cart: &mut Cart, server: &Cart| {
        *cart = server.clone()
      })
      .await;

    match result {
      Ok(cart) => {
        if !success.is_empty() {
          self.notifier.success(success);
        }
        Ok(cart)
      }
      Err(e) => {
        self.notifier.error(e.to_string());
        Err(e)
      }
    }
  }

  pub async fn add_to_cart(&self, product_id: u64) -> Result<Cart> {
    let client = self.client.clone();
    let request = async move { client.add_to_cart(product_id).await };

    match self.known_product(product_id) {
      Some(product) => {
        self
          .mutate_cart(&AddItem { product }, request, "Added to cart!")
          .await
      }
      None => {
        // Nothing to show optimistically; wait for the server's cart
        let result = async {
          request.await?;
          self.client.get_cart().await
        }
        .await;
        match result {
          Ok(cart) => {
            self.cart.publish(cart.clone());
            self.notifier.success("Added to cart!");
            Ok(cart)
          }
          Err(e) => {
            self.notifier.error(e.to_string());
            Err(e)
          }
        }
      }
    }
  }

  /// Change a line's quantity. Zero or less removes the line.
  pub async fn update_cart_quantity(&self, item_id: u64, quantity: i64) -> Result<Cart> {
    if quantity <= 0 {
      return self.remove_from_cart(item_id).await;
    }
    let to = u32::try_from(quantity).map_err(|_| eyre!("Quantity {} is too large", quantity))?;
    let from = self
      .cart
      .data()
      .and_then(|cart| cart.into_iter().find(|item| item.id == item_id))
      .map(|item| item.quantity)
      .unwrap_or(to);

    let client = self.client.clone();
    let request = async move { client.update_cart_item(item_id, to).await };
    self
      .mutate_cart(&SetQuantity { item_id, from, to }, request, "")
      .await
  }

  pub async fn remove_from_cart(&self, item_id: u64) -> Result<Cart> {
    let mutation = RemoveItem::new(&self.cart.data().unwrap_or_default(), item_id);
    let client = self.client.clone();
    let request = async move { client.remove_cart_item(item_id).await };
    self
      .mutate_cart(&mutation, request, "Removed from cart!")
      .await
  }

  pub async fn clear_cart(&self) -> Result<Cart> {
    let mutation = ClearCart::new(&self.cart.data().unwrap_or_default());
    let client = self.client.clone();
    let request = async move { client.clear_cart().await };
    self.mutate_cart(&mutation, request, "Cart cleared!").await
  }

  /// Order everything in the cart. Returns the WhatsApp link to finish the order.
  pub async fn checkout(&self) -> Result<Option<String>> {
    let cart = self.cart.data().unwrap_or_default();
    if cart.is_empty() {
      self.notifier.error("Your cart is empty");
      return Err(eyre!("Your cart is empty"));
    }

    let product_ids: Vec<u64> = cart.iter().map(|item| item.product.id).collect();
    let response = match self.client.create_order(&product_ids).await {
      Ok(response) => response,
      Err(e) => {
        self.notifier.error("Failed to process checkout");
        return Err(e);
      }
    };

    let Some(url) = response.whatsapp_url else {
      tracing::warn!("order created without a WhatsApp link");
      return Ok(None);
    };

    self.notifier.success("Redirecting to WhatsApp...");
    self.cart.publish(Vec::new());
    if let Err(e) = self.fetch_cart().await {
      tracing::warn!("Failed to refresh cart after checkout: {}", e);
    }
    if let Err(e) = self.fetch_orders().await {
      tracing::warn!("Failed to refresh orders after checkout: {}", e);
    }
    Ok(Some(url))
  }
}
