//! Durable TTL cache used to bridge the gap while live data loads.
//!
//! - Entries are namespaced into collections (`posts`, `players`, `schedule`, `products`)
//! - Every write is stamped; reads ignore entries older than five minutes
//! - Storage failures never reach callers: the cache degrades to always-miss

mod clock;
mod durable;
mod layer;
mod storage;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use durable::DurableStore;
pub use layer::{TtlCache, DEFAULT_TTL_SECS};
pub use storage::{CacheStorage, NoopStorage, RawEntry, SqliteStorage};
pub use traits::{
  CacheEntry, CacheEvent, CacheObserver, CacheSource, Cacheable, Collection, TracingObserver,
};
