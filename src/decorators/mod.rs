//! Handler-side flow control.
//!
//! Decorators wrap a handler function before it is given to an
//! [`Actor`](crate::Actor). Unlike [middlewares](crate::middlewares), they
//! are allowed to affect flow control: delay, skip, or absorb invocations.
//!
//! ```
//! use std::time::Duration;
//! use walnats::decorators::rate_limit;
//!
//! async fn send_sms(phone: String) -> Result<(), walnats::BoxError> {
//!     Ok(())
//! }
//!
//! let handler = rate_limit(32, Duration::from_secs(60), send_sms);
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use crate::errors::BoxError;

/// Limit how many jobs may start per time interval.
///
/// The count starts as soon as the handler starts: with a limit of 10 jobs
/// per 60 seconds, the 11th job waits until 60 seconds have passed since
/// the first one started.
pub fn rate_limit<T, R, F, Fut>(
    max_jobs: usize,
    period: Duration,
    handler: F,
) -> impl Fn(T) -> BoxFuture<'static, Result<R, BoxError>> + Clone + Send + Sync + 'static
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    assert!(max_jobs >= 1, "max_jobs must be at least 1");
    assert!(period > Duration::ZERO, "period must be positive");
    let semaphore = Arc::new(Semaphore::new(max_jobs));
    move |message| {
        let semaphore = semaphore.clone();
        let handler = handler.clone();
        Box::pin(async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore closed");
            // the permit comes back `period` after the job started
            tokio::spawn(async move {
                tokio::time::sleep(period).await;
                drop(permit);
            });
            handler(message).await
        })
    }
}

/// Require the predicate to be true before the handler can run.
///
/// While the predicate is false, the invocation is delayed, checking again
/// every `pause`. Useful for waiting on dependencies, e.g. a database
/// connection being established.
pub fn require<T, R, P, F, Fut>(
    predicate: P,
    pause: Duration,
    handler: F,
) -> impl Fn(T) -> BoxFuture<'static, Result<R, BoxError>> + Clone + Send + Sync + 'static
where
    T: Send + 'static,
    R: Send + 'static,
    P: Fn() -> bool + Clone + Send + Sync + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    move |message| {
        let predicate = predicate.clone();
        let handler = handler.clone();
        Box::pin(async move {
            while !predicate() {
                tokio::time::sleep(pause).await;
            }
            handler(message).await
        })
    }
}

/// Absorb handler errors downcastable to `E`.
///
/// Matching errors are logged and swallowed, so the message is acked
/// instead of retried; everything else propagates. Useful for errors that
/// can never be fixed by a retry. Avoid using it for flow control.
pub fn suppress<E, T, R, F, Fut>(
    handler: F,
) -> impl Fn(T) -> BoxFuture<'static, Result<R, BoxError>> + Clone + Send + Sync + 'static
where
    E: std::error::Error + Send + Sync + 'static,
    T: Send + 'static,
    R: Default + Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    move |message| {
        let handler = handler.clone();
        Box::pin(async move {
            match handler(message).await {
                Err(err) if err.downcast_ref::<E>().is_some() => {
                    tracing::warn!(error = %err, "suppressed exception in handler");
                    Ok(R::default())
                }
                other => other,
            }
        })
    }
}

/// Run the handler only if the received timestamp matches the pattern.
///
/// A companion for [`Clock`](crate::Clock) when an actor should not run on
/// every tick. The idea is similar to cron patterns: components that are
/// not specified accept any value; specified ones must match one of the
/// given values.
///
/// ```
/// use walnats::decorators::FilterTime;
///
/// async fn create_backup(dt: chrono::DateTime<chrono::Utc>) -> Result<(), walnats::BoxError> {
///     Ok(())
/// }
///
/// // run once a day at midnight
/// let handler = FilterTime::new().hour([0]).minute([0]).wrap(create_backup);
/// // run every 5 minutes
/// let handler = FilterTime::new().minute((0..60).step_by(5)).wrap(create_backup);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FilterTime {
    year: Option<Vec<i32>>,
    month: Option<Vec<u32>>,
    day: Option<Vec<u32>>,
    hour: Option<Vec<u32>>,
    minute: Option<Vec<u32>>,
}

impl FilterTime {
    /// A pattern accepting any timestamp.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepted years.
    pub fn year(mut self, years: impl IntoIterator<Item = i32>) -> Self {
        self.year = Some(years.into_iter().collect());
        self
    }

    /// Accepted months (1-12).
    pub fn month(mut self, months: impl IntoIterator<Item = u32>) -> Self {
        self.month = Some(months.into_iter().collect());
        self
    }

    /// Accepted days of the month (1-31).
    pub fn day(mut self, days: impl IntoIterator<Item = u32>) -> Self {
        self.day = Some(days.into_iter().collect());
        self
    }

    /// Accepted hours (0-23).
    pub fn hour(mut self, hours: impl IntoIterator<Item = u32>) -> Self {
        self.hour = Some(hours.into_iter().collect());
        self
    }

    /// Accepted minutes (0-59).
    pub fn minute(mut self, minutes: impl IntoIterator<Item = u32>) -> Self {
        self.minute = Some(minutes.into_iter().collect());
        self
    }

    fn matches(&self, dt: &DateTime<Utc>) -> bool {
        let accepted = |pattern: &Option<Vec<u32>>, value: u32| match pattern {
            None => true,
            Some(values) => values.contains(&value),
        };
        if let Some(years) = &self.year {
            if !years.contains(&dt.year()) {
                return false;
            }
        }
        accepted(&self.month, dt.month())
            && accepted(&self.day, dt.day())
            && accepted(&self.hour, dt.hour())
            && accepted(&self.minute, dt.minute())
    }

    /// Wrap a clock handler with the pattern.
    pub fn wrap<F, Fut>(
        self,
        handler: F,
    ) -> impl Fn(DateTime<Utc>) -> BoxFuture<'static, Result<(), BoxError>> + Clone + Send + Sync + 'static
    where
        F: Fn(DateTime<Utc>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        move |dt| {
            let handler = handler.clone();
            let matches = self.matches(&dt);
            Box::pin(async move {
                if matches {
                    handler(dt).await
                } else {
                    Ok(())
                }
            })
        }
    }
}
