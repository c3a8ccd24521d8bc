//! Keeping published state in step with the cache and the network.

pub mod optimistic;
pub mod resource;

pub use optimistic::{Mutation, Sequencer, Slot, Ticket};
pub use resource::{CacheBinding, CachedResource, EntityList, Keyed, ResourceState, Uncached};
