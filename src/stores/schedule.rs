use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::cache::SCHEDULE_EVENTS_KEY;
use crate::api::types::ScheduleEvent;
use crate::api::BefaClient;
use crate::cache::{Collection, TtlCache};
use crate::sync::{CachedResource, Keyed, ResourceState};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

const UNKNOWN_JERSEY: &str = "#9ca3af";

/// Display colour for a jersey label like "Black" or "BLUE JERSEY".
pub fn jersey_color(label: &str) -> &'static str {
  match label.trim().to_uppercase().as_str() {
    "BLACK" | "BLACK JERSEY" => "#000000",
    "BLUE" | "BLUE JERSEY" => "#0000FF",
    _ => UNKNOWN_JERSEY,
  }
}

fn event_date(event: &ScheduleEvent) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(event.date.trim(), "%Y-%m-%d").ok()
}

/// When an event starts. `None` if its date or time can't be read.
pub fn event_start(event: &ScheduleEvent) -> Option<NaiveDateTime> {
  let date = event_date(event)?;
  let time = event.time.trim();
  let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
    .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
    .ok()?;
  Some(date.and_time(time))
}

/// Order by date. Undated events go last; same-day events keep server order.
fn by_date(events: &mut Vec<ScheduleEvent>) {
  events.sort_by_key(|event| {
    let date = event_date(event);
    (date.is_none(), date)
  });
}

/// First event that starts after `now`.
pub fn next_event(events: &[ScheduleEvent], now: NaiveDateTime) -> Option<&ScheduleEvent> {
  events
    .iter()
    .filter_map(|event| event_start(event).map(|start| (start, event)))
    .filter(|(start, _)| *start > now)
    .min_by_key(|(start, _)| *start)
    .map(|(_, event)| event)
}

/// Time left until `target`: "2d 5h", "3h 20m", "45m", or "Now" once reached.
pub fn countdown(target: NaiveDateTime, now: NaiveDateTime) -> String {
  let left = target - now;
  if left <= chrono::Duration::zero() {
    return "Now".to_string();
  }

  let days = left.num_days();
  let hours = left.num_hours() % 24;
  let mins = left.num_minutes() % 60;

  if days > 0 {
    format!("{}d {}h", days, hours)
  } else if hours > 0 {
    format!("{}h {}m", hours, mins)
  } else {
    format!("{}m", mins)
  }
}

/// Training schedule.
pub struct ScheduleStore {
  client: BefaClient,
  events: CachedResource<Vec<ScheduleEvent>>,
}

impl ScheduleStore {
  pub fn new(client: BefaClient, cache: TtlCache) -> Self {
    Self {
      client,
      events: CachedResource::new(cache).with_prepare(by_date),
    }
  }

  pub fn events(&self) -> &CachedResource<Vec<ScheduleEvent>> {
    &self.events
  }

  pub async fn fetch_events(&self) -> Result<ResourceState<Vec<ScheduleEvent>>> {
    let binding = Keyed::new(Collection::Schedule, SCHEDULE_EVENTS_KEY);
    let client = self.client.clone();
    self
      .events
      .load(&binding, || async move { client.get_schedule_events().await })
      .await?;
    Ok(self.events.snapshot())
  }

  pub fn next_event(&self, now: NaiveDateTime) -> Option<ScheduleEvent> {
    let events = self.events.data()?;
    next_event(&events, now).cloned()
  }

  /// Countdown to the next event, if there is one.
  pub fn countdown(&self, now: NaiveDateTime) -> Option<String> {
    let start = self.next_event(now).as_ref().and_then(event_start)?;
    Some(countdown(start, now))
  }

  /// Refetch the schedule now and then every `every`, until the handle is aborted.
  pub fn spawn_refresh(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
    let store = Arc::clone(self);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        match store.fetch_events().await {
          Ok(state) => {
            tracing::debug!(events = state.data.map(|e| e.len()).unwrap_or(0), "schedule refreshed")
          }
          Err(e) => tracing::warn!("Failed to refresh training schedule: {}", e),
        }
      }
    })
  }
}
