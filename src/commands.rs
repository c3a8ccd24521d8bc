//! Command-line subcommands and their dispatch.
//!
//! Results go to stdout as pretty JSON; notices go to stderr.

use chrono::Local;
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;

use crate::api::types::ScheduleEvent;
use crate::app::App;
use crate::cache::Collection;
use crate::stores::schedule::{countdown, event_start, jersey_color, next_event};
use crate::sync::{CachedResource, ResourceState};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// List feed posts
  Posts,
  /// Show a post with its comments
  Post {
    id: u64,
    /// Keep running and print comments as they arrive
    #[arg(long)]
    follow: bool,
  },
  /// Like or unlike a post
  Like { id: u64 },
  /// Like or unlike a comment on a post
  LikeComment {
    /// Post the comment belongs to
    post_id: u64,
    comment_id: u64,
  },
  /// Share a post
  Share { id: u64 },
  /// Comment on a post
  Comment { post_id: u64, text: String },
  /// Player of the month, or the featured players
  Players {
    #[arg(long)]
    featured: bool,
  },
  /// Training schedule with a countdown to the next session
  Schedule {
    /// Keep running and refresh in the background
    #[arg(long)]
    watch: bool,
  },
  /// List store products
  Products,
  /// Show one product
  Product { id: u64 },
  /// Show or change the cart
  Cart {
    #[command(subcommand)]
    action: Option<CartAction>,
  },
  /// Order everything in the cart
  Checkout,
  /// List my orders
  Orders,
  /// Manage the local cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
pub enum CartAction {
  /// Add one of a product
  Add { product_id: u64 },
  /// Set a line's quantity (0 removes it)
  Set {
    item_id: u64,
    #[arg(allow_hyphen_values = true)]
    quantity: i64,
  },
  /// Remove a line
  Remove { item_id: u64 },
  /// Empty the cart
  Clear,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
  /// Drop every entry of a collection (posts, players, schedule, products)
  Clear { collection: String },
}

#[derive(Serialize)]
struct EventView<'a> {
  #[serde(flatten)]
  event: &'a ScheduleEvent,
  jersey_hex: &'static str,
}

#[derive(Serialize)]
struct ScheduleView<'a> {
  events: Vec<EventView<'a>>,
  next_event: Option<u64>,
  countdown: Option<String>,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", text);
  Ok(())
}

/// Print the outcome of a load. A failed refresh still prints the cached
/// data, with a warning.
fn show<T>(resource: &CachedResource<T>, result: Result<ResourceState<T>>) -> Result<()>
where
  T: Serialize + Clone + Send + Sync + 'static,
{
  let state = match result {
    Ok(state) => state,
    Err(e) => {
      let state = resource.snapshot();
      if state.data.is_none() {
        return Err(e);
      }
      eprintln!("warning: {} (showing cached data)", e);
      state
    }
  };
  match &state.data {
    Some(data) => print_json(data),
    None => Err(eyre!("Nothing to show")),
  }
}

fn print_schedule(events: &[ScheduleEvent]) -> Result<()> {
  let now = Local::now().naive_local();
  let next = next_event(events, now);
  let view = ScheduleView {
    events: events
      .iter()
      .map(|event| EventView {
        event,
        jersey_hex: jersey_color(&event.jersey_color),
      })
      .collect(),
    next_event: next.map(|e| e.id),
    countdown: next
      .and_then(event_start)
      .map(|start| countdown(start, now)),
  };
  print_json(&view)
}

pub async fn run(app: &App, command: Command) -> Result<()> {
  match command {
    Command::Posts => show(app.feed.posts(), app.feed.fetch_posts().await),
    Command::Post { id, follow } => {
      show(app.feed.selected(), app.feed.open_post(id).await)?;
      if follow {
        follow_post(app).await?;
      }
      Ok(())
    }
    Command::Like { id } => print_json(&app.feed.like_post(id).await?.post),
    Command::LikeComment { post_id, comment_id } => {
      // The comment must be on the open post to update it in place
      app.feed.open_post(post_id).await?;
      print_json(&app.feed.like_comment(comment_id).await?.comment)
    }
    Command::Share { id } => print_json(&app.feed.share_post(id).await?.post),
    Command::Comment { post_id, text } => print_json(&app.feed.add_comment(post_id, &text).await?),
    Command::Players { featured: true } => {
      show(app.players.featured(), app.players.fetch_featured_players().await)
    }
    Command::Players { featured: false } => show(
      app.players.player_of_month(),
      app.players.fetch_player_of_month().await,
    ),
    Command::Schedule { watch } => {
      if watch {
        watch_schedule(app).await
      } else {
        let state = match app.schedule.fetch_events().await {
          Ok(state) => state,
          Err(e) => {
            eprintln!("warning: {}", e);
            app.schedule.events().snapshot()
          }
        };
        let events = state.data.ok_or_else(|| eyre!("Failed to fetch training schedule"))?;
        print_schedule(&events)
      }
    }
    Command::Products => show(app.shop.products(), app.shop.fetch_products().await),
    Command::Product { id } => show(app.shop.product(), app.shop.view_product(id).await),
    Command::Cart { action } => {
      app.shop.fetch_cart().await?;
      let cart = match action {
        None => app.shop.cart().data().unwrap_or_default(),
        Some(CartAction::Add { product_id }) => {
          // Product details let the new line show before the server answers
          let _ = app.shop.fetch_products().await;
          app.shop.add_to_cart(product_id).await?
        }
        Some(CartAction::Set { item_id, quantity }) => {
          app.shop.update_cart_quantity(item_id, quantity).await?
        }
        Some(CartAction::Remove { item_id }) => app.shop.remove_from_cart(item_id).await?,
        Some(CartAction::Clear) => app.shop.clear_cart().await?,
      };
      print_json(&cart)
    }
    Command::Checkout => {
      app.shop.fetch_cart().await?;
      match app.shop.checkout().await? {
        Some(url) => {
          println!("{}", url);
          Ok(())
        }
        None => Err(eyre!("Order created, but no WhatsApp link was returned")),
      }
    }
    Command::Orders => show(app.shop.orders(), app.shop.fetch_orders().await),
    Command::Cache {
      action: CacheAction::Clear { collection },
    } => {
      let collection: Collection = collection.parse()?;
      if !app.clear_cache(collection) {
        return Err(eyre!("Cache is not available"));
      }
      eprintln!("Cleared cached {}", collection);
      Ok(())
    }
  }
}

/// Print new comments on the open post until Ctrl-C.
async fn follow_post(app: &App) -> Result<()> {
  let mut rx = app.feed.selected().subscribe();
  let mut seen = rx
    .borrow_and_update()
    .data
    .as_ref()
    .map(|post| post.comments.len())
    .unwrap_or(0);

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      changed = rx.changed() => {
        if changed.is_err() {
          break;
        }
        let fresh: Vec<_> = match &rx.borrow_and_update().data {
          Some(post) if post.comments.len() > seen => {
            let fresh = post.comments[seen..].to_vec();
            seen = post.comments.len();
            fresh
          }
          _ => Vec::new(),
        };
        for comment in &fresh {
          print_json(comment)?;
        }
      }
    }
  }

  app.feed.close_post();
  Ok(())
}

/// Print the schedule whenever the background refresh changes it, until Ctrl-C.
async fn watch_schedule(app: &App) -> Result<()> {
  let mut rx = app.schedule.events().subscribe();
  let refresh = app.schedule.spawn_refresh(app.config.schedule.refresh_interval());
  let mut last: Option<Vec<ScheduleEvent>> = None;

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      changed = rx.changed() => {
        if changed.is_err() {
          break;
        }
        let events = rx.borrow_and_update().data.clone();
        if let Some(events) = events {
          if last.as_ref() != Some(&events) {
            print_schedule(&events)?;
            last = Some(events);
          }
        }
      }
    }
  }

  refresh.abort();
  Ok(())
}
