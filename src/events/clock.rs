use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::errors::Error;

use super::event::Event;
use super::registry::{ConnectedEvents, EmitOpts, Meta};

/// Emit an event on every period boundary.
///
/// Run one clock per period next to your publisher and subscribe actors to
/// its event to get cron-like scheduled jobs (pair it with
/// [`FilterTime`](crate::decorators::FilterTime) for coarser schedules).
/// It is safe to run a replica of the clock on every instance: the emitted
/// message id is derived from the period number, so the broker
/// deduplicates the ticks.
///
/// ```no_run
/// # async fn example() -> Result<(), walnats::Error> {
/// let minute_passed = walnats::Clock::default();
/// let events = walnats::Events::new(vec![minute_passed.event().raw()]);
/// let conn = events.connect("nats://localhost:4222").await?;
/// conn.register(true, false).await?;
/// minute_passed.run(&conn, false).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Clock {
    event: Event<DateTime<Utc>>,
    period: u64,
    meta: Option<Vec<(String, String)>>,
    now: fn() -> DateTime<Utc>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(Event::new("minute-passed"), 60)
    }
}

impl Clock {
    /// A clock emitting `event` every `period` seconds.
    pub fn new(event: Event<DateTime<Utc>>, period: u64) -> Self {
        assert!(period > 0, "clock period must be positive");
        Self {
            event,
            period,
            meta: None,
            now: Utc::now,
        }
    }

    /// Extra headers to attach to every tick.
    pub fn meta(mut self, meta: Vec<(String, String)>) -> Self {
        self.meta = Some(meta);
        self
    }

    /// The event the clock emits.
    pub fn event(&self) -> &Event<DateTime<Utc>> {
        &self.event
    }

    #[cfg(test)]
    pub(crate) fn with_now(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Tick forever. With `burst`, emit a single tick and return.
    pub async fn run(&self, conn: &ConnectedEvents, burst: bool) -> Result<(), Error> {
        loop {
            let delay = delay_until_next_tick((self.now)(), self.period);
            tokio::time::sleep(delay).await;
            let now = (self.now)();
            let mut opts = EmitOpts::default().uid(&tick_uid(now, self.period));
            if let Some(meta) = &self.meta {
                opts = opts.meta(Meta::Headers(meta.clone()));
            }
            conn.emit(&self.event, &now, opts).await?;
            if burst {
                return Ok(());
            }
        }
    }
}

/// How long to sleep to reach the next multiple of `period`, plus a small
/// epsilon so the tick lands strictly inside the new period.
fn delay_until_next_tick(now: DateTime<Utc>, period: u64) -> Duration {
    let epoch = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;
    let period = period as f64;
    Duration::from_secs_f64(period - (epoch % period) + 0.001)
}

/// Message id shared by every replica that wakes in the same period.
fn tick_uid(now: DateTime<Utc>, period: u64) -> String {
    let period = period as i64;
    ((now.timestamp().div_euclid(period)) % period).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> DateTime<Utc> {
        text.parse().unwrap()
    }

    #[test]
    fn wakes_just_past_the_boundary() {
        let delay = delay_until_next_tick(at("2022-12-07T12:34:58.900Z"), 60);
        assert!(delay >= Duration::from_millis(1100), "got {delay:?}");
        assert!(delay <= Duration::from_millis(1102), "got {delay:?}");
    }

    #[test]
    fn full_period_when_on_the_boundary() {
        let delay = delay_until_next_tick(at("2022-12-07T12:35:00Z"), 60);
        assert!(delay >= Duration::from_secs(60), "got {delay:?}");
        assert!(delay <= Duration::from_millis(60_002), "got {delay:?}");
    }

    #[test]
    fn uid_is_stable_within_a_period() {
        let a = tick_uid(at("2022-12-07T12:35:00.001Z"), 60);
        let b = tick_uid(at("2022-12-07T12:35:59.900Z"), 60);
        assert_eq!(a, b);
    }

    #[test]
    fn uid_changes_across_periods() {
        let a = tick_uid(at("2022-12-07T12:35:30Z"), 60);
        let b = tick_uid(at("2022-12-07T12:36:30Z"), 60);
        assert_ne!(a, b);
    }

    #[test]
    fn mocked_now_drives_the_schedule() {
        let clock = Clock::default().with_now(|| "2022-12-07T12:34:58.900Z".parse().unwrap());
        assert_eq!(clock.event().name(), "minute-passed");
        let delay = delay_until_next_tick((clock.now)(), clock.period);
        // sleeps until >= 12:35:00.001
        assert!(delay >= Duration::from_millis(1100), "got {delay:?}");
        assert!(delay < Duration::from_millis(1102), "got {delay:?}");
    }
}
