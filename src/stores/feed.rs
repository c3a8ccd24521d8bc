use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;

use crate::api::cache::post_key;
use crate::api::types::{Comment, CommentActionResponse, Likeable, Post, PostActionResponse};
use crate::api::BefaClient;
use crate::cache::{Collection, TtlCache};
use crate::event::Notifier;
use crate::live::{ChannelState, LiveChannel};
use crate::sync::{CachedResource, EntityList, Keyed, Mutation, ResourceState, Sequencer};

/// Flip the like flag and move the counter with it.
///
/// Built from the entity as it is before the toggle. An unlike at a count of
/// zero leaves the counter alone, and so does its revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleLike {
  liking: bool,
  moves_count: bool,
}

impl ToggleLike {
  pub fn of<E: Likeable>(entity: &E) -> Self {
    let liking = !entity.is_liked();
    Self {
      liking,
      moves_count: liking || entity.like_count() > 0,
    }
  }

  fn step(entity: &mut impl Likeable, liked: bool, up: bool, moves_count: bool) {
    entity.set_liked(liked);
    if moves_count {
      let count = entity.like_count();
      entity.set_like_count(if up { count + 1 } else { count.saturating_sub(1) });
    }
  }
}

impl Default for ToggleLike {
  fn default() -> Self {
    Self {
      liking: true,
      moves_count: true,
    }
  }
}

impl<E: Likeable> Mutation<E> for ToggleLike {
  fn apply(&self, entity: &mut E) {
    Self::step(entity, self.liking, self.liking, self.moves_count);
  }

  fn revert(&self, entity: &mut E) {
    Self::step(entity, !self.liking, !self.liking, self.moves_count);
  }
}

pub struct CountShare;

impl Mutation<Post> for CountShare {
  fn apply(&self, post: &mut Post) {
    post.share_count += 1;
  }

  fn revert(&self, post: &mut Post) {
    post.share_count = post.share_count.saturating_sub(1);
  }
}

fn newest_first(posts: &mut Vec<Post>) {
  posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

fn comment_key(id: u64) -> String {
  format!("comment_{}", id)
}

/// Content hub: post list, the open post and its live comments.
pub struct FeedStore {
  client: BefaClient,
  notifier: Notifier,
  posts: CachedResource<Vec<Post>>,
  selected: Arc<CachedResource<Post>>,
  sequencer: Sequencer,
  live: Option<LiveChannel>,
}

impl FeedStore {
  pub fn new(client: BefaClient, cache: TtlCache, notifier: Notifier) -> Self {
    Self {
      client,
      notifier,
      posts: CachedResource::new(cache.clone()).with_prepare(newest_first),
      selected: Arc::new(CachedResource::new(cache)),
      sequencer: Sequencer::new(),
      live: None,
    }
  }

  /// Follow comments on the open post in real time.
  pub fn with_live(mut self, live: LiveChannel) -> Self {
    self.live = Some(live);
    self
  }

  pub fn posts(&self) -> &CachedResource<Vec<Post>> {
    &self.posts
  }

  pub fn selected(&self) -> &CachedResource<Post> {
    &self.selected
  }

  pub fn live(&self) -> Option<&LiveChannel> {
    self.live.as_ref()
  }

  pub fn selected_id(&self) -> Option<u64> {
    self.selected.data().map(|post| post.id)
  }

  pub async fn fetch_posts(&self) -> Result<ResourceState<Vec<Post>>> {
    let client = self.client.clone();
    if let Err(e) = self.posts.load(&EntityList, || async move { client.get_posts().await }).await {
      self.notifier.error("Failed to load posts");
      return Err(e);
    }
    Ok(self.posts.snapshot())
  }

  /// Load a post's detail and follow its comments.
  ///
  /// Switching to another post closes the previous one first.
  pub async fn open_post(&self, id: u64) -> Result<ResourceState<Post>> {
    let switching = self.selected_id().is_some_and(|current| current != id)
      || self.live_post_id().is_some_and(|current| current != id);
    if switching {
      self.close_post();
    }

    let binding = Keyed::new(Collection::Posts, post_key(id));
    let client = self.client.clone();
    if let Err(e) = self.selected.load(&binding, || async move { client.get_post(id).await }).await {
      self.notifier.error("Failed to load post");
      return Err(e);
    }

    // A later open_post may have taken over while this one was loading
    if self.selected_id() == Some(id) {
      self.follow(id);
    }
    Ok(self.selected.snapshot())
  }

  /// Stop following the open post and forget it.
  pub fn close_post(&self) {
    if let Some(live) = &self.live {
      if live.post_id().is_some() {
        live.disconnect();
        self.notifier.success("Disconnected from real-time updates");
      }
    }
    self.selected.reset();
  }

  fn live_post_id(&self) -> Option<u64> {
    self.live.as_ref().and_then(|live| live.post_id())
  }

  fn follow(&self, id: u64) {
    let Some(live) = &self.live else {
      return;
    };
    // Re-opening a post is how a failed channel gets retried
    if live.post_id() == Some(id) && live.state() != ChannelState::Failed {
      return;
    }

    let selected = self.selected.clone();
    let notifier = self.notifier.clone();
    let result = live.connect(id, self.client.token(), move |comment| {
      if selected.update(|post| post.push_comment(comment)) {
        selected.remember(&Keyed::new(Collection::Posts, post_key(id)));
        notifier.success("New comment received!");
      }
    });

    if let Err(e) = result {
      tracing::debug!(post_id = id, "not following live comments: {}", e);
    }
  }

  fn require_token(&self, message: &str) -> Result<()> {
    if self.client.token().is_some() {
      return Ok(());
    }
    self.notifier.error(message);
    Err(eyre!("{}", message))
  }

  /// Run `f` on every local copy of post `id`: the list entry and the open post.
  fn modify_post(&self, id: u64, f: &mut dyn FnMut(&mut Post)) -> bool {
    let in_list = self.posts.update(|posts| match posts.iter_mut().find(|p| p.id == id) {
      Some(post) => {
        f(post);
        true
      }
      None => false,
    });
    let open = self.selected.update(|post| {
      if post.id != id {
        return false;
      }
      f(post);
      true
    });
    in_list || open
  }

  /// Freshest local copy of post `id`: the open post first, then the list.
  fn local_post(&self, id: u64) -> Option<Post> {
    self.selected.data().filter(|p| p.id == id).or_else(|| {
      self
        .posts
        .data()
        .and_then(|posts| posts.into_iter().find(|p| p.id == id))
    })
  }

  fn local_comment(&self, id: u64) -> Option<Comment> {
    self
      .selected
      .data()
      .and_then(|post| post.comments.into_iter().find(|c| c.id == id))
  }

  /// Write the freshest local copy of post `id` back to the cache.
  fn remember_post(&self, id: u64) {
    if let Some(post) = self.local_post(id) {
      self.posts.cache().put_entity(&post);
    }
  }

  pub async fn like_post(&self, id: u64) -> Result<PostActionResponse> {
    self.require_token("Please log in to like")?;

    let toggle = self.local_post(id).map(|post| ToggleLike::of(&post)).unwrap_or_default();
    let slot = |f: &mut dyn FnMut(&mut Post)| self.modify_post(id, f);
    let client = self.client.clone();
    let result = self
      .sequencer
      .run(
        &post_key(id),
        &slot,
        &toggle,
        async move { client.like_post(id).await },
        |post: &mut Post, response: &PostActionResponse| post.reconcile_with(&response.post),
      )
      .await;

    match result {
      Ok(response) => {
        self.remember_post(id);
        self
          .notifier
          .success(response.message.clone().unwrap_or_else(|| "Post liked!".to_string()));
        Ok(response)
      }
      Err(e) => {
        self.notifier.error("Failed to like post");
        Err(e)
      }
    }
  }

  pub async fn share_post(&self, id: u64) -> Result<PostActionResponse> {
    self.require_token("Please log in to share")?;

    let slot = |f: &mut dyn FnMut(&mut Post)| self.modify_post(id, f);
    let client = self.client.clone();
    let result = self
      .sequencer
      .run(
        &post_key(id),
        &slot,
        &CountShare,
        async move { client.share_post(id).await },
        |post: &mut Post, response: &PostActionResponse| post.reconcile_with(&response.post),
      )
      .await;

    match result {
      Ok(response) => {
        self.remember_post(id);
        self
          .notifier
          .success(response.message.clone().unwrap_or_else(|| "Post shared!".to_string()));
        Ok(response)
      }
      Err(e) => {
        self.notifier.error("Failed to share post");
        Err(e)
      }
    }
  }

  /// Like a comment on the open post.
  pub async fn like_comment(&self, comment_id: u64) -> Result<CommentActionResponse> {
    self.require_token("Please log in to like")?;

    let toggle = self
      .local_comment(comment_id)
      .map(|comment| ToggleLike::of(&comment))
      .unwrap_or_default();
    let slot = |f: &mut dyn FnMut(&mut Comment)| {
      self.selected.update(|post| match post.comments.iter_mut().find(|c| c.id == comment_id) {
        Some(comment) => {
          f(comment);
          true
        }
        None => false,
      })
    };
    let client = self.client.clone();
    let result = self
      .sequencer
      .run(
        &comment_key(comment_id),
        &slot,
        &toggle,
        async move { client.like_comment(comment_id).await },
        |comment: &mut Comment, response: &CommentActionResponse| *comment = response.comment.clone(),
      )
      .await;

    match result {
      Ok(response) => {
        self.remember_post(response.comment.post);
        self
          .notifier
          .success(response.message.clone().unwrap_or_else(|| "Comment liked!".to_string()));
        Ok(response)
      }
      Err(e) => {
        self.notifier.error("Failed to like comment");
        Err(e)
      }
    }
  }

  pub async fn add_comment(&self, post_id: u64, text: &str) -> Result<Comment> {
    self.require_token("Please log in to comment")?;

    let text = text.trim();
    if text.is_empty() {
      return Err(eyre!("Comment text is empty"));
    }

    match self.client.add_comment(post_id, text).await {
      Ok(comment) => {
        // The live channel may echo it back; push_comment ignores duplicates
        self.modify_post(post_id, &mut |post: &mut Post| {
          post.push_comment(comment.clone());
        });
        self.remember_post(post_id);
        self.notifier.success("Comment added!");
        Ok(comment)
      }
      Err(e) => {
        self.notifier.error("Failed to add comment");
        Err(e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::NoticeLevel;
  use crate::live::{ChannelConfig, MessageStream, PushTransport};
  use crate::stores::testing;
  use futures::future::BoxFuture;
  use futures::{stream, FutureExt, StreamExt};
  use std::time::Duration;
  use tokio::time::timeout;
  use url::Url;
  use serde_json::json;
  use wiremock::matchers::{body_json, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn post_json(id: u64, likes: u64, liked: bool) -> serde_json::Value {
    json!({
      "id": id,
      "author": {"id": 1, "username": "coach"},
      "description": format!("post {}", id),
      "created_at": format!("2024-05-0{}T10:00:00Z", id),
      "like_count": likes,
      "is_liked": liked
    })
  }

  async fn mount_posts(server: &MockServer, posts: serde_json::Value) {
    Mock::given(method("GET"))
      .and(path("/api/content-hub/posts/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(posts))
      .mount(server)
      .await;
  }

  #[tokio::test]
  async fn test_fetch_posts_sorts_and_caches() {
    let server = MockServer::start().await;
    mount_posts(&server, json!([post_json(1, 0, false), post_json(2, 3, true)])).await;

    let (cache, _clock) = testing::cache();
    let store = FeedStore::new(testing::client(&server, None), cache.clone(), Notifier::silent());

    let state = store.fetch_posts().await.unwrap();
    let ids: Vec<u64> = state.data.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![2, 1]);

    let cached: Vec<Post> = cache.get_all(Collection::Posts);
    assert_eq!(cached.len(), 2);
  }

  #[tokio::test]
  async fn test_like_requires_token_and_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let (notifier, mut notices) = Notifier::channel();
    let store = FeedStore::new(testing::client(&server, None), TtlCache::disabled(), notifier);

    assert!(store.like_post(1).await.is_err());
    let notices = notices.drain();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "Please log in to like");
  }

  #[tokio::test]
  async fn test_failed_like_rolls_back() {
    let server = MockServer::start().await;
    mount_posts(&server, json!([post_json(1, 4, false)])).await;
    Mock::given(method("POST"))
      .and(path("/api/content-hub/posts/1/like/"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let (notifier, mut notices) = Notifier::channel();
    let store = FeedStore::new(testing::client(&server, Some("t")), TtlCache::disabled(), notifier);
    store.fetch_posts().await.unwrap();
    let before = store.posts().data();

    assert!(store.like_post(1).await.is_err());
    assert_eq!(store.posts().data(), before);

    let last = notices.drain().pop().unwrap();
    assert_eq!(last.level, NoticeLevel::Error);
    assert_eq!(last.message, "Failed to like post");
  }

  #[tokio::test]
  async fn test_like_takes_server_counts_and_updates_cache() {
    let server = MockServer::start().await;
    mount_posts(&server, json!([post_json(1, 4, false)])).await;
    Mock::given(method("POST"))
      .and(path("/api/content-hub/posts/1/like/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "message": "Liked",
        "post": post_json(1, 9, true)
      })))
      .mount(&server)
      .await;

    let (cache, _clock) = testing::cache();
    let (notifier, mut notices) = Notifier::channel();
    let store = FeedStore::new(testing::client(&server, Some("t")), cache.clone(), notifier);
    store.fetch_posts().await.unwrap();

    store.like_post(1).await.unwrap();

    let post = store.posts().data().unwrap().remove(0);
    assert_eq!((post.like_count, post.is_liked), (9, true));
    let cached: Post = cache.get(Collection::Posts, &post_key(1)).unwrap();
    assert_eq!(cached.like_count, 9);
    assert_eq!(notices.drain().pop().unwrap().message, "Liked");
  }

  #[tokio::test]
  async fn test_failed_unlike_at_zero_restores_exactly() {
    let server = MockServer::start().await;
    mount_posts(&server, json!([post_json(1, 0, true)])).await;
    Mock::given(method("POST"))
      .and(path("/api/content-hub/posts/1/like/"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let store = FeedStore::new(
      testing::client(&server, Some("t")),
      TtlCache::disabled(),
      Notifier::silent(),
    );
    store.fetch_posts().await.unwrap();
    let before = store.posts().data();

    assert!(store.like_post(1).await.is_err());
    assert_eq!(store.posts().data(), before);
  }

  #[tokio::test]
  async fn test_older_like_response_arriving_last_is_ignored() {
    let server = MockServer::start().await;
    mount_posts(&server, json!([post_json(1, 4, false)])).await;
    // First like: slow, answers with the state after one like
    Mock::given(method("POST"))
      .and(path("/api/content-hub/posts/1/like/"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"post": post_json(1, 5, true)}))
          .set_delay(Duration::from_millis(400)),
      )
      .up_to_n_times(1)
      .mount(&server)
      .await;
    // Second like (an unlike): fast, answers with the final state
    Mock::given(method("POST"))
      .and(path("/api/content-hub/posts/1/like/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"post": post_json(1, 4, false)})))
      .mount(&server)
      .await;

    let store = FeedStore::new(
      testing::client(&server, Some("t")),
      TtlCache::disabled(),
      Notifier::silent(),
    );
    store.fetch_posts().await.unwrap();

    let (first, second) = tokio::join!(store.like_post(1), async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      store.like_post(1).await
    });
    assert!(first.unwrap().post.is_liked);
    assert!(!second.unwrap().post.is_liked);

    let post = store.posts().data().unwrap().remove(0);
    assert_eq!((post.like_count, post.is_liked), (4, false));
  }

  #[tokio::test]
  async fn test_share_counts_up_then_rolls_back_on_failure() {
    let server = MockServer::start().await;
    mount_posts(&server, json!([post_json(1, 0, false)])).await;
    Mock::given(method("POST"))
      .and(path("/api/content-hub/posts/1/share/"))
      .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(200)))
      .mount(&server)
      .await;

    let (notifier, mut notices) = Notifier::channel();
    let store = FeedStore::new(testing::client(&server, Some("t")), TtlCache::disabled(), notifier);
    store.fetch_posts().await.unwrap();

    let mut rx = store.posts().subscribe();
    let (result, counted) = tokio::join!(store.share_post(1), async {
      timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| s.data.as_ref().is_some_and(|p| p[0].share_count == 1)),
      )
      .await
      .map(|seen| seen.is_ok())
    });

    assert_eq!(counted, Ok(true));
    assert!(result.is_err());
    assert_eq!(store.posts().data().unwrap()[0].share_count, 0);
    assert_eq!(notices.drain().pop().unwrap().message, "Failed to share post");
  }

  #[tokio::test]
  async fn test_share_takes_server_count() {
    let server = MockServer::start().await;
    mount_posts(&server, json!([post_json(1, 0, false)])).await;
    let mut shared = post_json(1, 0, false);
    shared["share_count"] = json!(7);
    Mock::given(method("POST"))
      .and(path("/api/content-hub/posts/1/share/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"post": shared})))
      .expect(1)
      .mount(&server)
      .await;

    let (notifier, mut notices) = Notifier::channel();
    let store = FeedStore::new(testing::client(&server, Some("t")), TtlCache::disabled(), notifier);
    store.fetch_posts().await.unwrap();

    store.share_post(1).await.unwrap();
    assert_eq!(store.posts().data().unwrap()[0].share_count, 7);
    assert_eq!(notices.drain().pop().unwrap().message, "Post shared!");
  }

  #[tokio::test]
  async fn test_like_comment_takes_server_comment() {
    let server = MockServer::start().await;
    let mut post = post_json(1, 0, false);
    post["comments"] = json!([
      {"id": 9, "post": 1, "author": {"id": 2}, "text": "Nice", "like_count": 2, "is_liked": false}
    ]);
    post["comment_count"] = json!(1);
    Mock::given(method("GET"))
      .and(path("/api/content-hub/posts/1/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(post))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/content-hub/comments/9/like/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "comment": {"id": 9, "post": 1, "author": {"id": 2}, "text": "Nice", "like_count": 5, "is_liked": true}
      })))
      .expect(1)
      .mount(&server)
      .await;

    let (cache, _clock) = testing::cache();
    let (notifier, mut notices) = Notifier::channel();
    let store = FeedStore::new(testing::client(&server, Some("t")), cache.clone(), notifier);
    store.open_post(1).await.unwrap();

    store.like_comment(9).await.unwrap();

    let comment = store.selected().data().unwrap().comments.remove(0);
    assert_eq!((comment.like_count, comment.is_liked), (5, true));
    let cached: Post = cache.get(Collection::Posts, &post_key(1)).unwrap();
    assert_eq!(cached.comments[0].like_count, 5);
    assert_eq!(notices.drain().pop().unwrap().message, "Comment liked!");
  }

  #[tokio::test]
  async fn test_open_post_then_add_comment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/content-hub/posts/1/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(post_json(1, 0, false)))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/content-hub/comments/"))
      .and(body_json(json!({"post": 1, "text": "Great session"})))
      .respond_with(ResponseTemplate::new(201).set_body_json(json!({
        "id": 30, "post": 1, "author": {"id": 1}, "text": "Great session"
      })))
      .expect(1)
      .mount(&server)
      .await;

    let store = FeedStore::new(
      testing::client(&server, Some("t")),
      TtlCache::disabled(),
      Notifier::silent(),
    );
    store.open_post(1).await.unwrap();
    store.add_comment(1, "  Great session ").await.unwrap();

    let post = store.selected().data().unwrap();
    assert_eq!(post.comment_count, 1);
    assert_eq!(post.comments[0].id, 30);
  }

  #[tokio::test]
  async fn test_close_post_forgets_selection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/content-hub/posts/1/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(post_json(1, 0, false)))
      .mount(&server)
      .await;

    let store = FeedStore::new(testing::client(&server, None), TtlCache::disabled(), Notifier::silent());
    store.open_post(1).await.unwrap();
    assert_eq!(store.selected_id(), Some(1));

    store.close_post();
    assert_eq!(store.selected_id(), None);
  }

  struct OneFrame(String);

  impl PushTransport for OneFrame {
    fn connect(&self, _url: Url) -> BoxFuture<'static, Result<MessageStream>> {
      let frame = self.0.clone();
      async move {
        let frames = stream::once(async move { Ok(frame) }).chain(stream::pending());
        Ok(frames.boxed())
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_live_comment_lands_on_open_post() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/content-hub/posts/1/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(post_json(1, 0, false)))
      .mount(&server)
      .await;

    let frame = json!({
      "comment": {"id": 77, "post": 1, "author": {"id": 4}, "text": "Up BEFA"}
    })
    .to_string();
    let live = LiveChannel::new(
      Arc::new(OneFrame(frame)),
      ChannelConfig::new("ws://localhost:8000"),
      Notifier::silent(),
    );
    let store = FeedStore::new(
      testing::client(&server, Some("t")),
      TtlCache::disabled(),
      Notifier::silent(),
    )
    .with_live(live);

    store.open_post(1).await.unwrap();
    let mut rx = store.selected().subscribe();
    let post = timeout(
      Duration::from_secs(2),
      rx.wait_for(|s| s.data.as_ref().is_some_and(|p| !p.comments.is_empty())),
    )
    .await
    .unwrap()
    .unwrap()
    .data
    .clone()
    .unwrap();

    assert_eq!(post.comments[0].id, 77);
    assert_eq!(post.comment_count, 1);

    store.close_post();
    assert_eq!(store.live().unwrap().state(), ChannelState::Disconnected);
  }

  #[test]
  fn test_toggle_like_reverts_exactly() {
    for (likes, liked) in [(2, true), (0, false), (0, true)] {
      let mut post: Post = serde_json::from_value(post_json(1, likes, liked)).unwrap();
      let before = post.clone();
      let toggle = ToggleLike::of(&post);

      toggle.apply(&mut post);
      assert_eq!(post.is_liked, !liked);
      toggle.revert(&mut post);
      assert_eq!(post, before);
    }

    let mut post: Post = serde_json::from_value(post_json(1, 0, true)).unwrap();
    ToggleLike::of(&post).apply(&mut post);
    assert_eq!((post.like_count, post.is_liked), (0, false));
  }
}
