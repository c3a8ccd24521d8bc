//! Optimistic mutations with rollback.
//!
//! A write action is applied to local state before the network call, so the
//! change shows up immediately. When the call resolves:
//!
//! - success: the server's record replaces the local guess
//! - failure: the mutation's exact inverse is applied
//!
//! Each entity has a lane of sequence numbers. A response only reconciles if
//! no newer mutation for the same entity has been issued since, and a failure
//! only rolls back if no newer mutation has already been confirmed. This
//! keeps a slow, stale response from clobbering a newer optimistic state.

use color_eyre::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

/// Local effect of a write action.
///
/// `revert` must be the exact inverse of `apply`: applying then reverting
/// leaves the entity equal to what it was.
pub trait Mutation<E> {
  fn apply(&self, entity: &mut E);
  fn revert(&self, entity: &mut E);
}

/// Where the local copy (or copies) of an entity live.
///
/// `modify` runs `f` on every copy and returns whether any was found.
pub trait Slot<E> {
  fn modify(&self, f: &mut dyn FnMut(&mut E)) -> bool;
}

impl<E, F> Slot<E> for F
where
  F: Fn(&mut dyn FnMut(&mut E)) -> bool,
{
  fn modify(&self, f: &mut dyn FnMut(&mut E)) -> bool {
    self(f)
  }
}

#[derive(Debug, Default, Clone, Copy)]
struct Lane {
  issued: u64,
  settled: u64,
  in_flight: u32,
}

/// Position of one mutation in its entity's lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
  key: String,
  seq: u64,
}

/// Per-entity ordering of optimistic mutations.
///
/// A lane exists only while one of its mutations is in flight.
#[derive(Debug, Default)]
pub struct Sequencer {
  lanes: Mutex<HashMap<String, Lane>>,
}

impl Sequencer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a new mutation for `key`.
  pub fn begin(&self, key: &str) -> Ticket {
    let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
    let lane = lanes.entry(key.to_string()).or_default();
    lane.issued += 1;
    lane.in_flight += 1;
    Ticket {
      key: key.to_string(),
      seq: lane.issued,
    }
  }

  /// Whether a successful response for `ticket` may overwrite local state.
  /// Marks the lane as confirmed up to this ticket if so.
  pub fn settle(&self, ticket: &Ticket) -> bool {
    let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
    let lane = lanes.entry(ticket.key.clone()).or_default();
    if ticket.seq == lane.issued && ticket.seq > lane.settled {
      lane.settled = ticket.seq;
      true
    } else {
      false
    }
  }

  /// Whether a failed mutation may still roll back its own delta.
  pub fn may_revert(&self, ticket: &Ticket) -> bool {
    let lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
    lanes
      .get(&ticket.key)
      .map(|lane| ticket.seq > lane.settled)
      .unwrap_or(true)
  }

  /// Mark `ticket` as resolved. Drops the lane once nothing is in flight.
  pub fn finish(&self, ticket: &Ticket) {
    let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(lane) = lanes.get_mut(&ticket.key) {
      lane.in_flight = lane.in_flight.saturating_sub(1);
      if lane.in_flight == 0 {
        lanes.remove(&ticket.key);
      }
    }
  }

  #[cfg(test)]
  fn lane_count(&self) -> usize {
    self.lanes.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  /// Apply `mutation` to `slot`, run `request`, then reconcile or roll back.
  ///
  /// Returns the server response, or the request error after rollback.
  pub async fn run<E, M, S, R, Fut, C>(
    &self,
    key: &str,
    slot: &S,
    mutation: &M,
    request: Fut,
    reconcile: C,
  ) -> Result<R>
  where
    M: Mutation<E>,
    S: Slot<E> + ?Sized,
    Fut: Future<Output = Result<R>>,
    C: Fn(&mut E, &R),
  {
    let ticket = self.begin(key);
    let applied = slot.modify(&mut |entity: &mut E| mutation.apply(entity));

    let result = match request.await {
      Ok(response) => {
        if self.settle(&ticket) {
          slot.modify(&mut |entity: &mut E| reconcile(entity, &response));
        } else {
          tracing::debug!(key, "newer mutation in flight, not reconciling");
        }
        Ok(response)
      }
      Err(e) => {
        if applied && self.may_revert(&ticket) {
          slot.modify(&mut |entity: &mut E| mutation.revert(entity));
        }
        Err(e)
      }
    };
    self.finish(&ticket);
    result
  }
}
